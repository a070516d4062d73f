//! Common Types Module
//!
//! Typed views of the PKI directory objects the evaluator consumes, the
//! findings it produces, and the fixed flag/OID policy it applies.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Certificate template flag constants (MS-CRTD 2.26, 2.28)
pub mod template_flags {
    /// msPKI-Certificate-Name-Flag: the enrollee supplies the subject
    pub const CT_FLAG_ENROLLEE_SUPPLIES_SUBJECT: u32 = 0x0000_0001;
    /// msPKI-Enrollment-Flag: every request is held for CA manager approval
    pub const CT_FLAG_PEND_ALL_REQUESTS: u32 = 0x0000_0002;
}

/// Extended key usages that let a certificate authenticate to the directory.
///
/// `(oid, meaning)` pairs; external protocol constants, not configuration.
pub const AUTHENTICATION_EKUS: &[(&str, &str)] = &[
    ("2.5.29.37.0", "Any Purpose"),
    ("1.3.6.1.4.1.311.20.2.2", "Smart Card Logon"),
    ("1.3.6.1.5.5.7.3.2", "Client Authentication"),
];

/// A certificate template as read from the configuration container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateTemplate {
    /// Template `cn`
    pub name: String,
    /// msPKI-Certificate-Name-Flag, 0 when absent
    pub subject_name_flag: u32,
    /// msPKI-Enrollment-Flag, 0 when absent
    pub enrollment_flag: u32,
    /// pKIExtendedKeyUsage OIDs, empty when absent
    pub extended_key_usage_oids: HashSet<String>,
}

impl CertificateTemplate {
    pub fn new<I, S>(name: &str, subject_name_flag: u32, enrollment_flag: u32, ekus: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            subject_name_flag,
            enrollment_flag,
            extended_key_usage_oids: ekus.into_iter().map(Into::into).collect(),
        }
    }
}

/// An enterprise CA (pKIEnrollmentService object).
///
/// Published template names keep their directory spelling; membership is
/// tested against a lowercased index because directory `cn` values compare
/// case-insensitively. Serde goes through `CertificationAuthorityRecord` so
/// the index is always rebuilt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "CertificationAuthorityRecord",
    into = "CertificationAuthorityRecord"
)]
pub struct CertificationAuthority {
    pub name: String,
    pub host_name: Option<String>,
    published_templates: Vec<String>,
    published_index: HashSet<String>,
}

impl CertificationAuthority {
    pub fn new<I, S>(name: &str, host_name: Option<&str>, published: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut published_templates = Vec::new();
        let mut published_index = HashSet::new();
        for template in published {
            let template = template.as_ref().trim();
            // first spelling wins for duplicates
            if published_index.insert(normalize_template_name(template)) {
                published_templates.push(template.to_string());
            }
        }

        Self {
            name: name.to_string(),
            host_name: host_name.map(str::to_string),
            published_templates,
            published_index,
        }
    }

    /// O(1) publication membership test
    pub fn publishes(&self, template_name: &str) -> bool {
        self.published_index
            .contains(&normalize_template_name(template_name))
    }

    pub fn published_count(&self) -> usize {
        self.published_index.len()
    }

    /// Published template names as read from `certificateTemplates`
    pub fn published_templates(&self) -> &[String] {
        &self.published_templates
    }
}

/// Serialized form of [`CertificationAuthority`]
#[derive(Serialize, Deserialize)]
struct CertificationAuthorityRecord {
    name: String,
    host_name: Option<String>,
    published_templates: Vec<String>,
}

impl From<CertificationAuthorityRecord> for CertificationAuthority {
    fn from(record: CertificationAuthorityRecord) -> Self {
        Self::new(
            &record.name,
            record.host_name.as_deref(),
            record.published_templates,
        )
    }
}

impl From<CertificationAuthority> for CertificationAuthorityRecord {
    fn from(ca: CertificationAuthority) -> Self {
        Self {
            name: ca.name,
            host_name: ca.host_name,
            published_templates: ca.published_templates,
        }
    }
}

fn normalize_template_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// One (risky template, publishing CA) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub template_name: String,
    pub ca_host_name: Option<String>,
    pub ca_name: String,
    /// The template carries an EKU from [`AUTHENTICATION_EKUS`]
    pub impersonation_capable: bool,
}

/// Extract domain name from a distinguished name
///
/// `CN=John,OU=Users,DC=example,DC=com` -> `example.com`
pub fn extract_domain_from_dn(dn: &str) -> String {
    dn.split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.to_uppercase().starts_with("DC=") {
                Some(&part[3..])
            } else {
                None
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Value of the leading RDN, e.g. `User` for `CN=User,CN=Certificate Templates,...`
pub fn first_rdn_value(dn: &str) -> Option<String> {
    let first = dn.split(',').next()?.trim();
    let (_, value) = first.split_once('=')?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

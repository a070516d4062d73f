//! Directory Reader
//!
//! Reads certificate templates and enterprise CAs from the PKI configuration
//! container and converts each entry into a typed record. Only the fields the
//! evaluator uses survive ingestion.
//!
//! Incomplete entries never fail a read. Each gap is recorded as a
//! [`MalformedAttribute`] and replaced by a neutral value:
//!
//! | attribute | replacement |
//! |---|---|
//! | `msPKI-Certificate-Name-Flag`, `msPKI-Enrollment-Flag` | `0` |
//! | `pKIExtendedKeyUsage` | empty set |
//! | `certificateTemplates` | empty set |
//! | `cn` | value of the first RDN |

use async_trait::async_trait;
use ldap3::{LdapConn, Scope, SearchEntry};
use serde::Serialize;
use std::sync::{Mutex, OnceLock};
use tracing::{debug, info, warn};

use crate::common_types::{extract_domain_from_dn, first_rdn_value, CertificateTemplate, CertificationAuthority};
use crate::config::DirectoryConfig;
use crate::errors::{DirectoryError, Result};
use crate::ldap_helpers::{
    attr_lists, attrs, enrollment_services_container, filters, templates_container, FlagAttr,
    SearchEntryExt,
};
use crate::ldap_timeout::{
    ldap_bind_with_timeout, ldap_connect_with_timeout, ldap_paged_search_with_timeout,
    ldap_search_with_timeout, ldap_unbind_with_timeout,
};

/// Source of PKI directory objects.
///
/// Both lists are fetched completely before evaluation starts.
#[async_trait]
pub trait DirectoryReader: Send + Sync {
    async fn list_certificate_templates(&self) -> Result<Vec<CertificateTemplate>>;

    async fn list_enterprise_cas(&self) -> Result<Vec<CertificationAuthority>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AttributeProblem {
    Missing,
    Unparseable(String),
}

/// An attribute the evaluator relies on that was absent or unreadable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedAttribute {
    pub object: String,
    pub attribute: &'static str,
    pub problem: AttributeProblem,
}

fn record(
    issues: &mut Vec<MalformedAttribute>,
    object: &str,
    attribute: &'static str,
    problem: AttributeProblem,
) {
    match &problem {
        AttributeProblem::Unparseable(raw) => warn!(
            "{}: unparseable {} value '{}', treating as 0",
            object, attribute, raw
        ),
        // EKUs and publication lists are legitimately empty on many objects
        AttributeProblem::Missing
            if attribute == attrs::PKI_EXTENDED_KEY_USAGE
                || attribute == attrs::CERTIFICATE_TEMPLATES
                || attribute == attrs::DNS_HOST_NAME =>
        {
            debug!("{}: no {} values", object, attribute)
        }
        AttributeProblem::Missing => warn!("{}: missing {}", object, attribute),
    }

    issues.push(MalformedAttribute {
        object: object.to_string(),
        attribute,
        problem,
    });
}

fn object_name(entry: &SearchEntry, issues: &mut Vec<MalformedAttribute>) -> String {
    match entry.get_optional_attr(attrs::CN).filter(|cn| !cn.is_empty()) {
        Some(cn) => cn,
        None => {
            record(issues, &entry.dn, attrs::CN, AttributeProblem::Missing);
            first_rdn_value(&entry.dn).unwrap_or_else(|| entry.dn.clone())
        }
    }
}

fn flag(
    entry: &SearchEntry,
    object: &str,
    attribute: &'static str,
    issues: &mut Vec<MalformedAttribute>,
) -> u32 {
    match entry.get_flag_attr(attribute) {
        FlagAttr::Present(value) => value,
        FlagAttr::Missing => {
            record(issues, object, attribute, AttributeProblem::Missing);
            0
        }
        FlagAttr::Unparseable(raw) => {
            record(issues, object, attribute, AttributeProblem::Unparseable(raw));
            0
        }
    }
}

/// Build a template record from a `pKICertificateTemplate` entry.
pub fn template_from_entry(
    entry: &SearchEntry,
    issues: &mut Vec<MalformedAttribute>,
) -> CertificateTemplate {
    let name = object_name(entry, issues);
    let subject_name_flag = flag(entry, &name, attrs::PKI_CERTIFICATE_NAME_FLAG, issues);
    let enrollment_flag = flag(entry, &name, attrs::PKI_ENROLLMENT_FLAG, issues);

    let ekus = if entry.has_values(attrs::PKI_EXTENDED_KEY_USAGE) {
        entry.get_multi_attr(attrs::PKI_EXTENDED_KEY_USAGE)
    } else if entry.has_values(attrs::PKI_CERTIFICATE_APPLICATION_POLICY) {
        entry.get_multi_attr(attrs::PKI_CERTIFICATE_APPLICATION_POLICY)
    } else {
        record(issues, &name, attrs::PKI_EXTENDED_KEY_USAGE, AttributeProblem::Missing);
        Vec::new()
    };

    CertificateTemplate::new(&name, subject_name_flag, enrollment_flag, ekus)
}

/// Build a CA record from a `pKIEnrollmentService` entry.
pub fn authority_from_entry(
    entry: &SearchEntry,
    issues: &mut Vec<MalformedAttribute>,
) -> CertificationAuthority {
    let name = object_name(entry, issues);

    let host_name = entry
        .get_optional_attr(attrs::DNS_HOST_NAME)
        .filter(|h| !h.is_empty());
    if host_name.is_none() {
        record(issues, &name, attrs::DNS_HOST_NAME, AttributeProblem::Missing);
    }

    let published = entry.get_multi_attr(attrs::CERTIFICATE_TEMPLATES);
    if published.is_empty() {
        record(issues, &name, attrs::CERTIFICATE_TEMPLATES, AttributeProblem::Missing);
    }

    CertificationAuthority::new(&name, host_name.as_deref(), published)
}

/// A configuration DN that does not exist is a configuration mistake, not
/// an empty forest.
fn require_configuration_container<T>(config_dn: &str, result: Result<T>) -> Result<T> {
    result.map_err(|e| {
        if e.is_not_found() {
            DirectoryError::ConfigError(format!(
                "Configuration container '{}' does not exist; check --config-dn",
                config_dn
            ))
        } else {
            e
        }
    })
}

/// `None` when the PKI container is absent, which means no AD CS objects of
/// that kind are deployed.
fn missing_container_as_empty<T>(base: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(found) => Ok(Some(found)),
        Err(e) if e.is_not_found() => {
            warn!("{} does not exist; no AD CS objects of this kind", base);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Reads the PKI configuration container over LDAP.
pub struct LdapDirectoryReader {
    config: DirectoryConfig,
    config_dn: OnceLock<String>,
    malformed: Mutex<Vec<MalformedAttribute>>,
}

impl LdapDirectoryReader {
    pub fn new(config: DirectoryConfig) -> Self {
        Self {
            config,
            config_dn: OnceLock::new(),
            malformed: Mutex::new(Vec::new()),
        }
    }

    /// Every degraded attribute seen so far, in read order
    pub fn malformed_attributes(&self) -> Vec<MalformedAttribute> {
        self.malformed
            .lock()
            .map(|issues| issues.clone())
            .unwrap_or_default()
    }

    async fn get_connection(&self) -> Result<LdapConn> {
        let ldap_url = self.config.ldap_url();
        info!(
            "Connecting to {} as {}",
            ldap_url, self.config.credentials
        );

        let ldap = ldap_connect_with_timeout(&ldap_url, self.config.connect_timeout).await?;
        let ldap = ldap_bind_with_timeout(ldap, &self.config.credentials, self.config.connect_timeout)
            .await?;

        debug!("LDAP bind successful");
        Ok(ldap)
    }

    /// Configuration naming context: cached value, explicit setting, or
    /// RootDSE. The DN is checked to exist before it is cached.
    async fn configuration_dn(&self, ldap: LdapConn) -> Result<(String, LdapConn)> {
        if let Some(dn) = self.config_dn.get() {
            return Ok((dn.clone(), ldap));
        }

        let (candidate, ldap) = match &self.config.config_dn {
            Some(dn) => (dn.clone(), ldap),
            None => self.root_dse_configuration_dn(ldap).await?,
        };

        let (_, ldap) = require_configuration_container(
            &candidate,
            ldap_search_with_timeout(
                ldap,
                &candidate,
                Scope::Base,
                filters::ANY_OBJECT,
                &[attrs::CN],
                self.config.search_timeout,
            )
            .await,
        )?;

        info!(
            "Using configuration container {} (forest {})",
            candidate,
            extract_domain_from_dn(&candidate)
        );
        let _ = self.config_dn.set(candidate.clone());

        Ok((candidate, ldap))
    }

    async fn root_dse_configuration_dn(&self, ldap: LdapConn) -> Result<(String, LdapConn)> {
        let (rs, ldap) = ldap_search_with_timeout(
            ldap,
            "",
            Scope::Base,
            filters::ANY_OBJECT,
            &[attrs::CONFIGURATION_NAMING_CONTEXT],
            self.config.search_timeout,
        )
        .await?;

        let config_dn = rs
            .into_iter()
            .next()
            .map(SearchEntry::construct)
            .and_then(|entry| entry.get_optional_attr(attrs::CONFIGURATION_NAMING_CONTEXT));

        match config_dn {
            Some(dn) => Ok((dn, ldap)),
            None => {
                ldap_unbind_with_timeout(ldap).await;
                Err(DirectoryError::ConfigError(
                    "Could not retrieve the Configuration Naming Context from RootDSE; \
                     pass --config-dn"
                        .to_string(),
                ))
            }
        }
    }

    /// Paged subtree search below a PKI container. A container that does not
    /// exist under a verified configuration DN yields no entries.
    async fn search_container(
        &self,
        container: fn(&str) -> String,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<SearchEntry>> {
        let ldap = self.get_connection().await?;
        let (config_dn, ldap) = self.configuration_dn(ldap).await?;
        let base = container(&config_dn);

        let found = missing_container_as_empty(
            &base,
            ldap_paged_search_with_timeout(
                ldap,
                &base,
                Scope::Subtree,
                filter,
                attributes,
                self.config.page_size,
                self.config.search_timeout,
            )
            .await,
        )?;

        match found {
            Some((rs, ldap)) => {
                ldap_unbind_with_timeout(ldap).await;
                Ok(rs.into_iter().map(SearchEntry::construct).collect())
            }
            None => Ok(Vec::new()),
        }
    }

    fn keep_issues(&self, issues: Vec<MalformedAttribute>) {
        if issues.is_empty() {
            return;
        }
        if let Ok(mut malformed) = self.malformed.lock() {
            malformed.extend(issues);
        }
    }
}

#[async_trait]
impl DirectoryReader for LdapDirectoryReader {
    async fn list_certificate_templates(&self) -> Result<Vec<CertificateTemplate>> {
        let entries = self
            .search_container(
                templates_container,
                filters::CERTIFICATE_TEMPLATES,
                attr_lists::TEMPLATE,
            )
            .await?;

        let mut issues = Vec::new();
        let templates = entries
            .iter()
            .map(|entry| template_from_entry(entry, &mut issues))
            .collect();
        self.keep_issues(issues);

        Ok(templates)
    }

    async fn list_enterprise_cas(&self) -> Result<Vec<CertificationAuthority>> {
        let entries = self
            .search_container(
                enrollment_services_container,
                filters::ENROLLMENT_SERVICES,
                attr_lists::ENROLLMENT_SERVICE,
            )
            .await?;

        let mut issues = Vec::new();
        let authorities = entries
            .iter()
            .map(|entry| authority_from_entry(entry, &mut issues))
            .collect();
        self.keep_issues(issues);

        Ok(authorities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap_helpers::test_entry;

    const TEMPLATE_DN: &str = "CN=VulnTemplate,CN=Certificate Templates,CN=Public Key Services,CN=Services,CN=Configuration,DC=corp,DC=local";
    const CA_DN: &str = "CN=corp-CA,CN=Enrollment Services,CN=Public Key Services,CN=Services,CN=Configuration,DC=corp,DC=local";

    #[test]
    fn test_template_from_complete_entry() {
        let entry = test_entry(
            TEMPLATE_DN,
            vec![
                ("cn", vec!["VulnTemplate"]),
                ("msPKI-Certificate-Name-Flag", vec!["1"]),
                ("msPKI-Enrollment-Flag", vec!["0"]),
                ("pKIExtendedKeyUsage", vec!["1.3.6.1.5.5.7.3.2", "1.3.6.1.5.5.7.3.4"]),
                ("displayName", vec!["Dropped at ingestion"]),
            ],
        );
        let mut issues = Vec::new();
        let template = template_from_entry(&entry, &mut issues);

        assert_eq!(template.name, "VulnTemplate");
        assert_eq!(template.subject_name_flag, 1);
        assert_eq!(template.enrollment_flag, 0);
        assert!(template.extended_key_usage_oids.contains("1.3.6.1.5.5.7.3.2"));
        assert_eq!(template.extended_key_usage_oids.len(), 2);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_missing_flags_degrade_to_zero() {
        let entry = test_entry(TEMPLATE_DN, vec![("cn", vec!["VulnTemplate"])]);
        let mut issues = Vec::new();
        let template = template_from_entry(&entry, &mut issues);

        assert_eq!(template.subject_name_flag, 0);
        assert_eq!(template.enrollment_flag, 0);
        assert!(template.extended_key_usage_oids.is_empty());

        let missing: Vec<&str> = issues.iter().map(|i| i.attribute).collect();
        assert_eq!(
            missing,
            vec![
                "msPKI-Certificate-Name-Flag",
                "msPKI-Enrollment-Flag",
                "pKIExtendedKeyUsage"
            ]
        );
        assert!(issues.iter().all(|i| i.problem == AttributeProblem::Missing));
    }

    #[test]
    fn test_unparseable_flag_is_recorded() {
        let entry = test_entry(
            TEMPLATE_DN,
            vec![
                ("cn", vec!["VulnTemplate"]),
                ("msPKI-Certificate-Name-Flag", vec!["not-a-number"]),
                ("msPKI-Enrollment-Flag", vec!["0"]),
                ("pKIExtendedKeyUsage", vec!["1.3.6.1.5.5.7.3.2"]),
            ],
        );
        let mut issues = Vec::new();
        let template = template_from_entry(&entry, &mut issues);

        assert_eq!(template.subject_name_flag, 0);
        assert_eq!(
            issues,
            vec![MalformedAttribute {
                object: "VulnTemplate".to_string(),
                attribute: "msPKI-Certificate-Name-Flag",
                problem: AttributeProblem::Unparseable("not-a-number".to_string()),
            }]
        );
    }

    #[test]
    fn test_negative_name_flag_keeps_low_bits() {
        let entry = test_entry(
            TEMPLATE_DN,
            vec![
                ("cn", vec!["VulnTemplate"]),
                ("msPKI-Certificate-Name-Flag", vec!["-1509949439"]),
                ("msPKI-Enrollment-Flag", vec!["41"]),
            ],
        );
        let mut issues = Vec::new();
        let template = template_from_entry(&entry, &mut issues);

        assert_eq!(template.subject_name_flag & 1, 1);
        assert_eq!(template.enrollment_flag, 41);
    }

    #[test]
    fn test_application_policy_fallback() {
        let entry = test_entry(
            TEMPLATE_DN,
            vec![
                ("cn", vec!["VulnTemplate"]),
                ("msPKI-Certificate-Name-Flag", vec!["1"]),
                ("msPKI-Enrollment-Flag", vec!["0"]),
                ("msPKI-Certificate-Application-Policy", vec!["1.3.6.1.4.1.311.20.2.2"]),
            ],
        );
        let mut issues = Vec::new();
        let template = template_from_entry(&entry, &mut issues);

        assert!(template.extended_key_usage_oids.contains("1.3.6.1.4.1.311.20.2.2"));
        assert!(issues.is_empty());
    }

    #[test]
    fn test_missing_cn_uses_rdn() {
        let entry = test_entry(
            TEMPLATE_DN,
            vec![
                ("msPKI-Certificate-Name-Flag", vec!["1"]),
                ("msPKI-Enrollment-Flag", vec!["0"]),
            ],
        );
        let mut issues = Vec::new();
        let template = template_from_entry(&entry, &mut issues);

        assert_eq!(template.name, "VulnTemplate");
        assert_eq!(issues[0].attribute, "cn");
        assert_eq!(issues[0].object, TEMPLATE_DN);
    }

    #[test]
    fn test_authority_from_entry() {
        let entry = test_entry(
            CA_DN,
            vec![
                ("cn", vec!["corp-CA"]),
                ("dNSHostName", vec!["ca01.corp.local"]),
                ("certificateTemplates", vec!["VulnTemplate", "User", "Machine"]),
            ],
        );
        let mut issues = Vec::new();
        let ca = authority_from_entry(&entry, &mut issues);

        assert_eq!(ca.name, "corp-CA");
        assert_eq!(ca.host_name.as_deref(), Some("ca01.corp.local"));
        assert!(ca.publishes("VulnTemplate"));
        assert_eq!(ca.published_count(), 3);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_authority_without_host_or_templates() {
        let entry = test_entry(CA_DN, vec![("cn", vec!["corp-CA"])]);
        let mut issues = Vec::new();
        let ca = authority_from_entry(&entry, &mut issues);

        assert_eq!(ca.host_name, None);
        assert_eq!(ca.published_count(), 0);
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn test_missing_configuration_dn_is_config_error() {
        let result: Result<()> = Err(DirectoryError::from_result_code(32, "0000208D"));
        let err = require_configuration_container("CN=Configuraton,DC=corp,DC=local", result)
            .unwrap_err();

        assert!(matches!(err, DirectoryError::ConfigError(_)));
        assert!(err.to_string().contains("CN=Configuraton,DC=corp,DC=local"));
    }

    #[test]
    fn test_configuration_dn_check_passes_other_errors_through() {
        let result: Result<()> = Err(DirectoryError::from_result_code(50, ""));
        let err = require_configuration_container("CN=Configuration,DC=corp,DC=local", result)
            .unwrap_err();
        assert!(matches!(err, DirectoryError::PermissionDenied(_)));

        assert_eq!(
            require_configuration_container("CN=Configuration,DC=corp,DC=local", Ok(7)).unwrap(),
            7
        );
    }

    #[test]
    fn test_missing_pki_container_is_empty() {
        let base = "CN=Enrollment Services,CN=Public Key Services,CN=Services,CN=Configuration,DC=corp,DC=local";
        let result: Result<Vec<u8>> = Err(DirectoryError::from_result_code(32, "0000208D"));
        assert_eq!(missing_container_as_empty(base, result).unwrap(), None);

        assert_eq!(
            missing_container_as_empty(base, Ok(vec![1u8])).unwrap(),
            Some(vec![1u8])
        );
    }

    #[test]
    fn test_pki_container_search_failure_propagates() {
        let base = "CN=Certificate Templates,CN=Public Key Services,CN=Services,CN=Configuration,DC=corp,DC=local";
        let result: Result<Vec<u8>> = Err(DirectoryError::Timeout("120s".to_string()));
        assert!(matches!(
            missing_container_as_empty(base, result),
            Err(DirectoryError::Timeout(_))
        ));
    }

    #[test]
    fn test_reader_starts_without_issues() {
        let config = DirectoryConfig::new("dc01.corp.local", crate::secure_types::Credentials::anonymous());
        let reader = LdapDirectoryReader::new(config);
        assert!(reader.malformed_attributes().is_empty());
    }
}

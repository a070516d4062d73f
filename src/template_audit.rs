// Certificate Template Audit Module - flags templates that let any enrollee
// obtain a certificate for an identity of their choosing (ESC1).

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common_types::{
    template_flags, CertificateTemplate, CertificationAuthority, Finding, AUTHENTICATION_EKUS,
};
use crate::directory_reader::DirectoryReader;
use crate::errors::Result;

/// Terminal state of an evaluation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskState {
    NoRiskFound,
    RiskFound,
}

impl std::fmt::Display for RiskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskState::NoRiskFound => write!(f, "No risk found"),
            RiskState::RiskFound => write!(f, "Risk found"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateAudit {
    pub total_templates: u32,
    pub risky_templates: u32,
    pub total_authorities: u32,
    pub impersonation_capable_findings: u32,
    pub findings: Vec<Finding>,
    pub state: RiskState,
}

impl TemplateAudit {
    pub fn has_risk(&self) -> bool {
        self.state == RiskState::RiskFound
    }
}

/// Enrollee controls the subject AND requests are issued without approval.
///
/// Absent flags reach here as 0 (see `directory_reader::MalformedAttribute`).
pub fn is_risky(subject_name_flag: u32, enrollment_flag: u32) -> bool {
    let enrollee_supplies_subject =
        (subject_name_flag & template_flags::CT_FLAG_ENROLLEE_SUPPLIES_SUBJECT) != 0;
    let pends_all_requests = (enrollment_flag & template_flags::CT_FLAG_PEND_ALL_REQUESTS) != 0;

    enrollee_supplies_subject && !pends_all_requests
}

/// Issued certificates can be used to log on to the directory.
///
/// An empty EKU set never matches.
pub fn is_authentication_capable(template: &CertificateTemplate) -> bool {
    AUTHENTICATION_EKUS
        .iter()
        .any(|(oid, _)| template.extended_key_usage_oids.contains(*oid))
}

/// One `(template, ca)` pair per CA that publishes a risky template, CAs in
/// input order and templates in input order within each CA.
pub fn cross_reference<'a>(
    risky: &[&'a CertificateTemplate],
    authorities: &'a [CertificationAuthority],
) -> Vec<(&'a CertificateTemplate, &'a CertificationAuthority)> {
    let mut pairs = Vec::new();

    for ca in authorities {
        for template in risky {
            if ca.publishes(&template.name) {
                pairs.push((*template, ca));
            }
        }
    }

    pairs
}

/// Pure, total evaluation over already-fetched directory data.
pub fn evaluate(
    templates: &[CertificateTemplate],
    authorities: &[CertificationAuthority],
) -> TemplateAudit {
    let risky: Vec<&CertificateTemplate> = templates
        .iter()
        .filter(|t| is_risky(t.subject_name_flag, t.enrollment_flag))
        .collect();

    for template in &risky {
        debug!(
            "Template '{}' allows enrollee-supplied subject with automatic issuance",
            template.name
        );
    }

    let findings: Vec<Finding> = cross_reference(&risky, authorities)
        .into_iter()
        .map(|(template, ca)| Finding {
            template_name: template.name.clone(),
            ca_host_name: ca.host_name.clone(),
            ca_name: ca.name.clone(),
            impersonation_capable: is_authentication_capable(template),
        })
        .collect();

    let impersonation_capable_findings =
        findings.iter().filter(|f| f.impersonation_capable).count() as u32;
    let state = if findings.is_empty() {
        RiskState::NoRiskFound
    } else {
        RiskState::RiskFound
    };

    TemplateAudit {
        total_templates: templates.len() as u32,
        risky_templates: risky.len() as u32,
        total_authorities: authorities.len() as u32,
        impersonation_capable_findings,
        findings,
        state,
    }
}

/// Fetch both object lists, then evaluate. A directory failure aborts the
/// run before any evaluation.
pub async fn audit_templates<R>(reader: &R) -> Result<TemplateAudit>
where
    R: DirectoryReader + ?Sized,
{
    let templates = reader.list_certificate_templates().await?;
    info!("Retrieved {} certificate templates", templates.len());

    let authorities = reader.list_enterprise_cas().await?;
    info!("Retrieved {} enterprise CAs", authorities.len());

    let audit = evaluate(&templates, &authorities);
    info!(
        "{}: {} risky templates, {} findings ({} impersonation-capable)",
        audit.state,
        audit.risky_templates,
        audit.findings.len(),
        audit.impersonation_capable_findings
    );

    Ok(audit)
}

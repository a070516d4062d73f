//! Report rendering: aligned text table or JSON.

use chrono::Utc;
use serde::Serialize;

use crate::common_types::Finding;
use crate::template_audit::TemplateAudit;

pub const NO_RISK_MESSAGE: &str =
    "No certificate templates with enrollee-supplied subjects and automatic issuance were found.";

const HEADERS: [&str; 4] = [
    "VulnerableTemplateName",
    "CAHostName",
    "CAName",
    "IsVulnerableToADUserImpersonation",
];

fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

/// One line per finding in evaluation order, columns padded to the widest cell.
pub fn render_table(findings: &[Finding]) -> String {
    let rows: Vec<[&str; 4]> = findings
        .iter()
        .map(|f| {
            [
                f.template_name.as_str(),
                f.ca_host_name.as_deref().unwrap_or(""),
                f.ca_name.as_str(),
                yes_no(f.impersonation_capable),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let format_row = |cells: &[&str; 4]| {
        cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format_row(&HEADERS));
    lines.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  "),
    );
    lines.extend(rows.iter().map(format_row));

    lines.join("\n")
}

/// Machine-readable run summary
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub scan_timestamp: String,
    pub has_risk: bool,
    pub total_templates: u32,
    pub risky_templates: u32,
    pub total_authorities: u32,
    pub impersonation_capable_findings: u32,
    pub malformed_attributes: usize,
    pub findings: Vec<Finding>,
}

impl AuditReport {
    pub fn from_audit(audit: &TemplateAudit, malformed_attributes: usize) -> Self {
        Self {
            scan_timestamp: Utc::now().to_rfc3339(),
            has_risk: audit.has_risk(),
            total_templates: audit.total_templates,
            risky_templates: audit.risky_templates,
            total_authorities: audit.total_authorities,
            impersonation_capable_findings: audit.impersonation_capable_findings,
            malformed_attributes,
            findings: audit.findings.clone(),
        }
    }
}

pub fn render_json(report: &AuditReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

/// Text for stdout: the table when there are findings, otherwise the fixed
/// no-risk message.
pub fn render_text(audit: &TemplateAudit) -> String {
    if audit.has_risk() {
        render_table(&audit.findings)
    } else {
        NO_RISK_MESSAGE.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common_types::{CertificateTemplate, CertificationAuthority};
    use crate::template_audit::evaluate;

    fn finding(template: &str, host: Option<&str>, ca: &str, capable: bool) -> Finding {
        Finding {
            template_name: template.to_string(),
            ca_host_name: host.map(str::to_string),
            ca_name: ca.to_string(),
            impersonation_capable: capable,
        }
    }

    #[test]
    fn test_table_layout() {
        let table = render_table(&[
            finding("VulnTemplate", Some("ca01.corp.local"), "corp-CA", true),
            finding("WebLegacy", Some("ca01.corp.local"), "corp-CA", false),
        ]);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("VulnerableTemplateName  CAHostName       CAName"));
        assert!(lines[1].chars().all(|c| c == '-' || c == ' '));
        assert_eq!(
            lines[2],
            "VulnTemplate            ca01.corp.local  corp-CA  Yes"
        );
        assert_eq!(
            lines[3],
            "WebLegacy               ca01.corp.local  corp-CA  No"
        );
    }

    #[test]
    fn test_separator_underlines_full_header() {
        let table = render_table(&[finding("VulnTemplate", Some("ca01"), "corp-CA", true)]);
        let lines: Vec<&str> = table.lines().collect();

        // the last header is the widest cell of its column, so the dashes
        // span the header text and rows ending in Yes/No stay shorter
        assert_eq!(lines[1].len(), lines[0].len());
        assert!(lines[1].ends_with(&"-".repeat(HEADERS[3].len())));
        assert!(lines[2].len() < lines[1].len());
    }

    #[test]
    fn test_table_missing_host_is_blank() {
        let table = render_table(&[finding("VulnTemplate", None, "corp-CA", true)]);
        let row = table.lines().nth(2).unwrap_or_default();
        assert_eq!(row, "VulnTemplate                        corp-CA  Yes");
    }

    #[test]
    fn test_table_widens_for_long_names() {
        let long = "A".repeat(40);
        let table = render_table(&[finding(&long, Some("h"), "ca", false)]);
        let separator = table.lines().nth(1).unwrap_or_default();
        assert!(separator.starts_with(&"-".repeat(40)));
    }

    #[test]
    fn test_text_without_findings() {
        let audit = evaluate(&[], &[]);
        assert_eq!(render_text(&audit), NO_RISK_MESSAGE);
    }

    #[test]
    fn test_json_report() {
        let templates = vec![CertificateTemplate::new(
            "VulnTemplate",
            1,
            0,
            ["1.3.6.1.5.5.7.3.2"],
        )];
        let cas = vec![CertificationAuthority::new(
            "corp-CA",
            Some("ca01.corp.local"),
            ["VulnTemplate"],
        )];
        let audit = evaluate(&templates, &cas);
        let report = AuditReport::from_audit(&audit, 2);

        let json = render_json(&report).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["has_risk"], true);
        assert_eq!(value["malformed_attributes"], 2);
        assert_eq!(value["findings"][0]["template_name"], "VulnTemplate");
        assert_eq!(value["findings"][0]["ca_host_name"], "ca01.corp.local");
        assert_eq!(value["findings"][0]["impersonation_capable"], true);
        assert!(chrono::DateTime::parse_from_rfc3339(
            value["scan_timestamp"].as_str().unwrap()
        )
        .is_ok());
    }
}

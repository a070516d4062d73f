//! AD CS certificate template audit
//!
//! Finds certificate templates that let any enrollee name an arbitrary subject
//! and are issued without manager approval, and reports every enterprise CA
//! that publishes them.

pub mod common_types;
pub mod config;
pub mod directory_reader;
pub mod errors;
mod ldap_helpers;
pub mod ldap_timeout;
pub mod report;
pub mod secure_types;
pub mod template_audit;

pub use common_types::{CertificateTemplate, CertificationAuthority, Finding};
pub use directory_reader::{DirectoryReader, LdapDirectoryReader, MalformedAttribute};
pub use errors::{DirectoryError, Result};
pub use template_audit::{audit_templates, evaluate, RiskState, TemplateAudit};

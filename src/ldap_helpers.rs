//! LDAP Helper Utilities
//!
//! Attribute extraction for PKI configuration objects, plus the attribute
//! names, filters and container RDNs the directory reader queries.

use ldap3::SearchEntry;

/// Outcome of reading a single-valued integer flag attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FlagAttr {
    Present(u32),
    Missing,
    Unparseable(String),
}

/// Extension trait for SearchEntry to simplify attribute extraction
///
/// Attribute names compare case-insensitively; servers may echo a different
/// casing than the one requested.
pub(crate) trait SearchEntryExt {
    /// All values of an attribute, `None` when the attribute is absent
    fn attr_values(&self, name: &str) -> Option<&Vec<String>>;

    /// First value of an attribute (returns None if missing or empty)
    fn get_optional_attr(&self, name: &str) -> Option<String>;

    /// Get all values for a multi-valued attribute, empty if missing
    fn get_multi_attr(&self, name: &str) -> Vec<String>;

    /// Read a 32-bit flag attribute.
    ///
    /// AD stores these as signed integers, so `-1509949439` is the bitmask
    /// `0xA6000001`.
    fn get_flag_attr(&self, name: &str) -> FlagAttr;

    /// Check if attribute exists AND has at least one value
    fn has_values(&self, name: &str) -> bool;
}

impl SearchEntryExt for SearchEntry {
    fn attr_values(&self, name: &str) -> Option<&Vec<String>> {
        self.attrs.get(name).or_else(|| {
            self.attrs
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, values)| values)
        })
    }

    fn get_optional_attr(&self, name: &str) -> Option<String> {
        self.attr_values(name).and_then(|v| v.first()).cloned()
    }

    fn get_multi_attr(&self, name: &str) -> Vec<String> {
        self.attr_values(name).cloned().unwrap_or_default()
    }

    fn get_flag_attr(&self, name: &str) -> FlagAttr {
        match self.get_optional_attr(name) {
            None => FlagAttr::Missing,
            Some(raw) => match raw.trim().parse::<i64>() {
                Ok(v) if v >= i64::from(i32::MIN) && v <= i64::from(u32::MAX) => {
                    FlagAttr::Present(v as u32)
                }
                _ => FlagAttr::Unparseable(raw),
            },
        }
    }

    fn has_values(&self, name: &str) -> bool {
        self.attr_values(name)
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    }
}

/// PKI attribute names
pub(crate) mod attrs {
    pub const CN: &str = "cn";
    pub const DNS_HOST_NAME: &str = "dNSHostName";
    pub const CONFIGURATION_NAMING_CONTEXT: &str = "configurationNamingContext";

    // Certificate templates
    pub const PKI_CERTIFICATE_NAME_FLAG: &str = "msPKI-Certificate-Name-Flag";
    pub const PKI_ENROLLMENT_FLAG: &str = "msPKI-Enrollment-Flag";
    pub const PKI_EXTENDED_KEY_USAGE: &str = "pKIExtendedKeyUsage";
    pub const PKI_CERTIFICATE_APPLICATION_POLICY: &str = "msPKI-Certificate-Application-Policy";

    // Enrollment services
    pub const CERTIFICATE_TEMPLATES: &str = "certificateTemplates";
}

/// LDAP filter patterns
pub(crate) mod filters {
    pub const CERTIFICATE_TEMPLATES: &str = "(objectClass=pKICertificateTemplate)";
    pub const ENROLLMENT_SERVICES: &str = "(objectClass=pKIEnrollmentService)";
    pub const ANY_OBJECT: &str = "(objectClass=*)";
}

/// Attribute lists per query
pub(crate) mod attr_lists {
    use super::attrs;

    pub const TEMPLATE: &[&str] = &[
        attrs::CN,
        attrs::PKI_CERTIFICATE_NAME_FLAG,
        attrs::PKI_ENROLLMENT_FLAG,
        attrs::PKI_EXTENDED_KEY_USAGE,
        attrs::PKI_CERTIFICATE_APPLICATION_POLICY,
    ];

    pub const ENROLLMENT_SERVICE: &[&str] = &[
        attrs::CN,
        attrs::DNS_HOST_NAME,
        attrs::CERTIFICATE_TEMPLATES,
    ];
}

/// Search base under the configuration naming context
pub(crate) fn templates_container(config_dn: &str) -> String {
    format!(
        "CN=Certificate Templates,CN=Public Key Services,CN=Services,{}",
        config_dn
    )
}

pub(crate) fn enrollment_services_container(config_dn: &str) -> String {
    format!(
        "CN=Enrollment Services,CN=Public Key Services,CN=Services,{}",
        config_dn
    )
}

#[cfg(test)]
pub(crate) fn test_entry(dn: &str, attrs: Vec<(&str, Vec<&str>)>) -> SearchEntry {
    use std::collections::HashMap;

    let mut attr_map = HashMap::new();
    for (key, values) in attrs {
        attr_map.insert(
            key.to_string(),
            values.into_iter().map(|s| s.to_string()).collect(),
        );
    }
    SearchEntry {
        dn: dn.to_string(),
        attrs: attr_map,
        bin_attrs: HashMap::new(),
    }
}

//! Error handling module
//!
//! Every variant of [`DirectoryError`] means the PKI configuration container
//! could not be reached or queried. The evaluator never produces or catches
//! these; they abort the run before any evaluation happens.
//!
//! Missing or unparseable attributes on individual directory objects are not
//! errors at all, see [`crate::directory_reader::MalformedAttribute`].

use thiserror::Error;

/// Directory access failure (connection, authentication, or query)
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// LDAP connection error
    #[error("LDAP connection failed: {0}")]
    ConnectionError(String),

    /// Bind rejected
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Search base does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// LDAP query/search error
    #[error("LDAP query failed: {0}")]
    QueryError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl DirectoryError {
    /// Map a non-success LDAP result code to an error.
    pub fn from_result_code(rc: u32, text: &str) -> Self {
        match rc {
            // 8 = Stronger authentication required
            8 => DirectoryError::AuthError(format!(
                "LDAP signing is required by this domain controller. \
                 Use LDAPS (port 636) instead of plain LDAP: {}",
                text
            )),
            // 49 = Invalid credentials
            49 => DirectoryError::AuthError(format!("Invalid credentials: {}", text)),
            // 32 = No such object
            32 => DirectoryError::NotFound(format!("Object not found: {}", text)),
            // 50 = Insufficient access rights
            50 => DirectoryError::PermissionDenied(format!("Insufficient access rights: {}", text)),
            // 51 = Busy
            51 => DirectoryError::Timeout(format!("Server is busy: {}", text)),
            // 52 = Unavailable
            52 => DirectoryError::ConnectionError(format!("Server unavailable: {}", text)),
            // 53 = Unwilling to perform
            53 => DirectoryError::PermissionDenied(format!(
                "Server unwilling to perform operation: {}",
                text
            )),
            _ => DirectoryError::QueryError(format!("LDAP error code {}: {}", rc, text)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DirectoryError::NotFound(_))
    }
}

impl From<ldap3::LdapError> for DirectoryError {
    fn from(err: ldap3::LdapError) -> Self {
        match err {
            ldap3::LdapError::LdapResult { result } => {
                DirectoryError::from_result_code(result.rc, &result.text)
            }
            ldap3::LdapError::EndOfStream => {
                DirectoryError::ConnectionError("Connection closed unexpectedly".to_string())
            }
            ldap3::LdapError::Io { source } => {
                DirectoryError::ConnectionError(format!("I/O error: {}", source))
            }
            ldap3::LdapError::Timeout { elapsed: _ } => {
                DirectoryError::Timeout("LDAP operation timed out".to_string())
            }
            _ => DirectoryError::QueryError(format!("LDAP error: {}", err)),
        }
    }
}

impl From<std::io::Error> for DirectoryError {
    fn from(err: std::io::Error) -> Self {
        DirectoryError::ConnectionError(format!("I/O error: {}", err))
    }
}

impl From<tokio::task::JoinError> for DirectoryError {
    fn from(err: tokio::task::JoinError) -> Self {
        DirectoryError::ConnectionError(format!("Task join error: {}", err))
    }
}

/// Result type alias for directory operations
pub type Result<T> = std::result::Result<T, DirectoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DirectoryError::ConnectionError("test".to_string());
        assert_eq!(err.to_string(), "LDAP connection failed: test");

        let err = DirectoryError::AuthError("bad password".to_string());
        assert_eq!(err.to_string(), "Authentication failed: bad password");

        let err = DirectoryError::ConfigError("no server".to_string());
        assert_eq!(err.to_string(), "Configuration error: no server");
    }

    #[test]
    fn test_result_code_mapping() {
        assert!(matches!(
            DirectoryError::from_result_code(49, "80090308"),
            DirectoryError::AuthError(_)
        ));
        assert!(DirectoryError::from_result_code(32, "0000208D").is_not_found());
        assert!(matches!(
            DirectoryError::from_result_code(50, ""),
            DirectoryError::PermissionDenied(_)
        ));
        assert!(matches!(
            DirectoryError::from_result_code(51, ""),
            DirectoryError::Timeout(_)
        ));
        assert!(matches!(
            DirectoryError::from_result_code(52, ""),
            DirectoryError::ConnectionError(_)
        ));
        assert!(matches!(
            DirectoryError::from_result_code(53, ""),
            DirectoryError::PermissionDenied(_)
        ));
    }

    #[test]
    fn test_signing_required_suggests_ldaps() {
        let err = DirectoryError::from_result_code(8, "00002028");
        assert!(matches!(err, DirectoryError::AuthError(_)));
        assert!(err.to_string().contains("LDAPS"));
    }

    #[test]
    fn test_unknown_result_code_keeps_code_in_message() {
        let err = DirectoryError::from_result_code(80, "other");
        assert!(matches!(err, DirectoryError::QueryError(_)));
        assert!(err.to_string().contains("80"));
    }

    #[test]
    fn test_ldap_error_conversion() {
        let err: DirectoryError = ldap3::LdapError::EndOfStream.into();
        assert!(matches!(err, DirectoryError::ConnectionError(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: DirectoryError = io_err.into();
        assert!(matches!(err, DirectoryError::ConnectionError(_)));
    }
}

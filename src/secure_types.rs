//! Secure Types Module
//!
//! Bind credentials that zero the password from memory on drop and never
//! render it through `Debug` or `Display`.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A secure string that automatically zeros its contents when dropped.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct SecureString {
    inner: String,
}

impl SecureString {
    pub fn new(s: String) -> Self {
        Self { inner: s }
    }

    /// Temporarily exposes the secret. Use immediately, do not store.
    pub fn expose_secret(&self) -> &str {
        &self.inner
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecureString([REDACTED])")
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// LDAP simple-bind credentials. An empty bind DN means an anonymous bind.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    bind_dn: String,
    password: SecureString,
}

impl Credentials {
    pub fn new(bind_dn: String, password: String) -> Self {
        Self {
            bind_dn,
            password: SecureString::new(password),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn bind_dn(&self) -> &str {
        &self.bind_dn
    }

    /// Use this method only when binding.
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    pub fn is_anonymous(&self) -> bool {
        self.bind_dn.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("bind_dn", &self.bind_dn)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_anonymous() {
            f.write_str("anonymous")
        } else {
            write!(f, "{} (password: [REDACTED])", self.bind_dn)
        }
    }
}

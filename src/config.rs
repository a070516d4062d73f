//! Run configuration from command-line flags and environment variables.
//!
//! Every option has a default so that a plain invocation on a domain-joined
//! host works without arguments.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{DirectoryError, Result};
use crate::ldap_timeout::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_PAGE_SIZE, DEFAULT_SEARCH_TIMEOUT};
use crate::secure_types::Credentials;

#[derive(Parser, Debug)]
#[command(
    name = "adcs-template-audit",
    version,
    about = "Report AD CS certificate templates that allow enrollee-supplied subjects with automatic issuance"
)]
pub struct Cli {
    #[arg(
        long,
        env = "ADCS_AUDIT_SERVER",
        help = "Domain controller or domain DNS name, optionally with :port or ldap(s):// (default: USERDNSDOMAIN)"
    )]
    pub server: Option<String>,

    #[arg(long, env = "ADCS_AUDIT_BIND_DN", default_value = "", help = "Bind DN or UPN (empty for anonymous bind)")]
    pub bind_dn: String,

    #[arg(long, env = "ADCS_AUDIT_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    #[arg(long, help = "Force LDAPS even when the server does not use port 636")]
    pub ldaps: bool,

    #[arg(long, env = "ADCS_AUDIT_CONFIG_DN", help = "Configuration naming context (default: read from RootDSE)")]
    pub config_dn: Option<String>,

    #[arg(
        long,
        env = "ADCS_AUDIT_CONNECT_TIMEOUT",
        default_value_t = DEFAULT_CONNECT_TIMEOUT.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Connect and bind timeout in seconds"
    )]
    pub connect_timeout: u64,

    #[arg(
        long,
        env = "ADCS_AUDIT_SEARCH_TIMEOUT",
        default_value_t = DEFAULT_SEARCH_TIMEOUT.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Timeout in seconds for each directory search, all pages included"
    )]
    pub search_timeout: u64,

    #[arg(
        long,
        env = "ADCS_AUDIT_PAGE_SIZE",
        default_value_t = DEFAULT_PAGE_SIZE,
        value_parser = clap::value_parser!(i32).range(1..)
    )]
    pub page_size: i32,

    #[arg(long, help = "Output machine-readable JSON")]
    pub json: bool,

    #[arg(long, env = "ADCS_AUDIT_LOG_DIR", help = "Directory for the log file (default: next to the executable)")]
    pub log_dir: Option<PathBuf>,

    #[arg(short, long, help = "Log progress to stderr")]
    pub verbose: bool,
}

/// Everything the LDAP directory reader needs to connect and search.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub server: String,
    pub use_ldaps: bool,
    pub credentials: Credentials,
    pub config_dn: Option<String>,
    pub connect_timeout: Duration,
    pub search_timeout: Duration,
    pub page_size: i32,
}

impl DirectoryConfig {
    pub fn new(server: &str, credentials: Credentials) -> Self {
        Self {
            server: server.to_string(),
            use_ldaps: server.ends_with(":636") || server.starts_with("ldaps://"),
            credentials,
            config_dn: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn ldap_url(&self) -> String {
        let host = self
            .server
            .trim_start_matches("ldaps://")
            .trim_start_matches("ldap://");

        if self.use_ldaps {
            format!("ldaps://{}", host)
        } else {
            format!("ldap://{}", host)
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub directory: DirectoryConfig,
    pub json: bool,
    pub log_dir: Option<PathBuf>,
    pub verbose: bool,
}

impl AuditConfig {
    /// Resolve the CLI, falling back to `USERDNSDOMAIN` for the server.
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let fallback = std::env::var("USERDNSDOMAIN").ok();
        Self::resolve(cli, fallback)
    }

    fn resolve(cli: Cli, fallback_server: Option<String>) -> Result<Self> {
        let server = cli
            .server
            .or(fallback_server)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                DirectoryError::ConfigError(
                    "No directory server configured. Pass --server or set ADCS_AUDIT_SERVER \
                     (USERDNSDOMAIN is used when available)."
                        .to_string(),
                )
            })?;

        let mut directory = DirectoryConfig::new(&server, Credentials::new(cli.bind_dn, cli.password));
        directory.use_ldaps |= cli.ldaps;
        directory.config_dn = cli.config_dn.filter(|dn| !dn.trim().is_empty());
        directory.connect_timeout = Duration::from_secs(cli.connect_timeout);
        directory.search_timeout = Duration::from_secs(cli.search_timeout);
        directory.page_size = cli.page_size;

        Ok(Self {
            directory,
            json: cli.json,
            log_dir: cli.log_dir,
            verbose: cli.verbose,
        })
    }
}

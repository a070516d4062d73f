use anyhow::Context;
use clap::Parser;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use adcs_template_audit::config::{AuditConfig, Cli};
use adcs_template_audit::report::{render_json, render_text, AuditReport};
use adcs_template_audit::{audit_templates, LdapDirectoryReader};

const LOG_FILE_NAME: &str = "adcs-template-audit.log";

fn default_log_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
}

/// `RUST_LOG` when set, otherwise `default_level`
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// File layer at info plus stderr console layer at warn (info with
/// `--verbose`). Without a writable log directory only the console layer is
/// installed.
fn init_logging(log_dir: &Path, verbose: bool) -> Option<WorkerGuard> {
    let file_appender = std::fs::create_dir_all(log_dir)
        .ok()
        .and_then(|_| {
            RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .filename_prefix(LOG_FILE_NAME)
                .build(log_dir)
                .ok()
        });

    let (file_layer, guard) = match file_appender {
        Some(appender) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(env_filter("info"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // stdout carries the report
    let console_level = if verbose { "info" } else { "warn" };
    let console_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(true)
        .with_filter(env_filter(console_level));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .init();

    if guard.is_none() {
        tracing::warn!("Log directory {} is not writable, logging to console only", log_dir.display());
    }

    guard
}

async fn run(config: AuditConfig) -> anyhow::Result<()> {
    let reader = LdapDirectoryReader::new(config.directory);
    let audit = audit_templates(&reader)
        .await
        .context("Certificate template audit failed")?;

    let malformed = reader.malformed_attributes();
    if !malformed.is_empty() {
        tracing::info!(
            "{} directory attributes were missing or unreadable and were treated as empty",
            malformed.len()
        );
    }

    if config.json {
        let report = AuditReport::from_audit(&audit, malformed.len());
        println!("{}", render_json(&report).context("Failed to serialize report")?);
    } else {
        println!("{}", render_text(&audit));
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_dir = cli.log_dir.clone().unwrap_or_else(default_log_dir);
    let _guard = init_logging(&log_dir, cli.verbose);

    tracing::info!("adcs-template-audit {} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!("Log file: {}", log_dir.join(LOG_FILE_NAME).display());

    let result = match AuditConfig::from_cli(cli).context("Invalid configuration") {
        Ok(config) => run(config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

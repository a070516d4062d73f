//! Timeout wrappers for synchronous LDAP operations
//!
//! `ldap3`'s `LdapConn` blocks, and a connect to an unreachable server can hang
//! indefinitely. Every operation here runs inside `spawn_blocking` under a
//! `tokio::time::timeout`, and hands the connection back to the caller.

use ldap3::controls::{ControlParser, PagedResults, RawControl};
use ldap3::{LdapConn, LdapConnSettings, ResultEntry, Scope};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::errors::{DirectoryError, Result};
use crate::secure_types::Credentials;

/// Default connection timeout (15 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default search timeout, covering all pages of a paged search (2 minutes)
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Unbind is best effort
const UNBIND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default page size for paged searches
pub const DEFAULT_PAGE_SIZE: i32 = 500;

/// Simple Paged Results control (RFC 2696)
const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";

/// rc=4 sizeLimitExceeded
const SIZE_LIMIT_EXCEEDED: u32 = 4;

/// Opens an LDAP connection with a timeout.
///
/// TLS certificate verification is disabled so that LDAPS works against
/// domain controllers whose certificates chain to an internal CA.
pub async fn ldap_connect_with_timeout(url: &str, connect_timeout: Duration) -> Result<LdapConn> {
    let url = url.to_string();

    let result = timeout(connect_timeout, async {
        tokio::task::spawn_blocking(move || {
            let settings = LdapConnSettings::new()
                .set_conn_timeout(connect_timeout)
                .set_no_tls_verify(true);

            LdapConn::with_settings(settings, &url)
        })
        .await?
        .map_err(DirectoryError::from)
    })
    .await;

    match result {
        Ok(inner) => inner,
        Err(_) => Err(DirectoryError::Timeout(format!(
            "Server did not respond within {} seconds. \
             Please verify the server address and network connectivity.",
            connect_timeout.as_secs()
        ))),
    }
}

/// Performs an LDAP simple bind with a timeout.
///
/// Takes ownership of the connection to move it into the blocking task and
/// returns it after a successful bind.
pub async fn ldap_bind_with_timeout(
    ldap: LdapConn,
    credentials: &Credentials,
    bind_timeout: Duration,
) -> Result<LdapConn> {
    let credentials = credentials.clone();

    let result = timeout(bind_timeout, async {
        tokio::task::spawn_blocking(move || {
            let mut ldap = ldap;
            ldap.simple_bind(credentials.bind_dn(), credentials.password())?
                .success()?;
            Ok::<LdapConn, DirectoryError>(ldap)
        })
        .await?
    })
    .await;

    match result {
        Ok(inner) => inner,
        Err(_) => Err(DirectoryError::Timeout(format!(
            "Bind operation did not complete within {} seconds",
            bind_timeout.as_secs()
        ))),
    }
}

/// Unbinds with a short timeout. Failures only get logged; the connection is
/// dropped either way.
pub async fn ldap_unbind_with_timeout(ldap: LdapConn) {
    let unbind_result = timeout(
        UNBIND_TIMEOUT,
        tokio::task::spawn_blocking(move || {
            let mut ldap = ldap;
            ldap.unbind()
        }),
    )
    .await;

    match unbind_result {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!("Unbind failed: {}", e),
        Ok(Err(e)) => warn!("Unbind task error: {}", e),
        Err(_) => warn!("Unbind timed out (connection will be dropped)"),
    }
}

/// Best-effort unbind of a connection whose operation failed. Runs on the
/// blocking thread that already owns it.
trait CloseAfterError {
    fn close_after_error(self);
}

impl CloseAfterError for LdapConn {
    fn close_after_error(mut self) {
        if let Err(e) = self.unbind() {
            debug!("Unbind after failed search: {}", e);
        }
    }
}

/// Pairs a finished search with its connection, unbinding on failure.
fn hand_back<C: CloseAfterError, T>(conn: C, result: Result<T>) -> Result<(T, C)> {
    match result {
        Ok(entries) => Ok((entries, conn)),
        Err(e) => {
            conn.close_after_error();
            Err(e)
        }
    }
}

fn run_search(
    ldap: &mut LdapConn,
    base_dn: &str,
    scope: Scope,
    filter: &str,
    attrs: Vec<&str>,
) -> Result<Vec<ResultEntry>> {
    // SearchResult is a tuple struct: (Vec<ResultEntry>, LdapResult)
    let search_result = ldap.search(base_dn, scope, filter, attrs)?;
    let entries = search_result.0;
    let ldap_result = search_result.1;

    match ldap_result.rc {
        0 => Ok(entries),
        SIZE_LIMIT_EXCEEDED => {
            warn!(
                "ldap_search: Size limit exceeded (rc=4), returning {} partial entries",
                entries.len()
            );
            Ok(entries)
        }
        rc => Err(DirectoryError::from_result_code(rc, &ldap_result.text)),
    }
}

fn run_paged_search(
    ldap: &mut LdapConn,
    base_dn: &str,
    scope: Scope,
    filter: &str,
    attrs: Vec<&str>,
    page_size: i32,
) -> Result<Vec<ResultEntry>> {
    let mut all_entries: Vec<ResultEntry> = Vec::new();
    let mut page_count = 0;
    let mut cookie: Vec<u8> = Vec::new();

    loop {
        page_count += 1;

        let paged_control: RawControl = PagedResults {
            size: page_size,
            cookie: cookie.clone(),
        }
        .into();

        let result = ldap
            .with_controls(vec![paged_control])
            .search(base_dn, scope, filter, attrs.clone())?;

        let entries = result.0;
        let ldap_result = result.1;

        if ldap_result.rc != 0 && ldap_result.rc != SIZE_LIMIT_EXCEEDED {
            error!(
                "ldap_paged_search: Search failed with rc={}: {}",
                ldap_result.rc, ldap_result.text
            );
            return Err(DirectoryError::from_result_code(
                ldap_result.rc,
                &ldap_result.text,
            ));
        }

        let entries_in_page = entries.len();
        all_entries.extend(entries);
        debug!(
            "ldap_paged_search: Page {} returned {} entries (total so far: {})",
            page_count,
            entries_in_page,
            all_entries.len()
        );

        // Control is a tuple struct where .1 is the RawControl
        let next_cookie = ldap_result
            .ctrls
            .iter()
            .find(|ctrl| ctrl.1.ctype == PAGED_RESULTS_OID)
            .and_then(|ctrl| ctrl.1.val.as_ref())
            .map(|val| PagedResults::parse(val).cookie)
            .unwrap_or_default();

        if next_cookie.is_empty() {
            info!(
                "ldap_paged_search: Completed {} pages, {} total entries",
                page_count,
                all_entries.len()
            );
            return Ok(all_entries);
        }
        cookie = next_cookie;
    }
}

/// Performs a single-request LDAP search with a timeout.
///
/// Used for RootDSE and base-object reads. sizeLimitExceeded (rc=4) returns
/// the partial set. On failure the connection is unbound and dropped; after a
/// timeout it is dropped by the blocking task once the server answers.
pub async fn ldap_search_with_timeout(
    ldap: LdapConn,
    base_dn: &str,
    scope: Scope,
    filter: &str,
    attrs: &[&str],
    search_timeout: Duration,
) -> Result<(Vec<ResultEntry>, LdapConn)> {
    let base_dn = base_dn.to_string();
    let filter = filter.to_string();
    let attrs: Vec<String> = attrs.iter().map(|s| s.to_string()).collect();

    debug!(
        "ldap_search: base '{}' filter {} (timeout: {}s)",
        base_dn,
        filter,
        search_timeout.as_secs()
    );

    let result = timeout(search_timeout, async {
        tokio::task::spawn_blocking(move || {
            let mut ldap = ldap;
            let attrs_refs: Vec<&str> = attrs.iter().map(|s| s.as_str()).collect();
            let result = run_search(&mut ldap, &base_dn, scope, &filter, attrs_refs);
            hand_back(ldap, result)
        })
        .await?
    })
    .await;

    match result {
        Ok(inner) => inner,
        Err(_) => {
            error!("ldap_search: Search timed out after {}s", search_timeout.as_secs());
            Err(DirectoryError::Timeout(format!(
                "Query did not complete within {} seconds",
                search_timeout.as_secs()
            )))
        }
    }
}

/// Performs a paged LDAP search with a timeout covering every page.
///
/// Uses the Simple Paged Results control so large configuration containers
/// are not cut off by the server's MaxPageSize. Failure handling matches
/// [`ldap_search_with_timeout`].
pub async fn ldap_paged_search_with_timeout(
    ldap: LdapConn,
    base_dn: &str,
    scope: Scope,
    filter: &str,
    attrs: &[&str],
    page_size: i32,
    search_timeout: Duration,
) -> Result<(Vec<ResultEntry>, LdapConn)> {
    let base_dn = base_dn.to_string();
    let filter = filter.to_string();
    let attrs: Vec<String> = attrs.iter().map(|s| s.to_string()).collect();

    info!(
        "ldap_paged_search: base '{}' filter {} (page_size: {}, timeout: {}s)",
        base_dn,
        filter,
        page_size,
        search_timeout.as_secs()
    );

    let result = timeout(search_timeout, async {
        tokio::task::spawn_blocking(move || {
            let mut ldap = ldap;
            let attrs_refs: Vec<&str> = attrs.iter().map(|s| s.as_str()).collect();
            let result =
                run_paged_search(&mut ldap, &base_dn, scope, &filter, attrs_refs, page_size);
            hand_back(ldap, result)
        })
        .await?
    })
    .await;

    match result {
        Ok(inner) => inner,
        Err(_) => {
            error!(
                "ldap_paged_search: Search timed out after {}s",
                search_timeout.as_secs()
            );
            Err(DirectoryError::Timeout(format!(
                "Paged query did not complete within {} seconds",
                search_timeout.as_secs()
            )))
        }
    }
}

//! Storage capability probe.
//!
//! Every check is independent: a failure degrades that one field to `false`
//! or `None` and the probe carries on. `probe` itself never fails.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use localstore_core::{Diagnostics, IsolationHeaders, Result, StorageEstimate, StoreError};

const HEADER_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// The environment the worker runs in.
pub trait Host: Send {
    fn is_secure_context(&self) -> bool;

    /// Root directory of the durable store, `None` when the host offers none.
    fn storage_root(&self) -> Option<PathBuf>;

    /// `None` when the host has no estimate API at all.
    fn storage_estimate(&self) -> Option<io::Result<StorageEstimate>>;

    /// Response headers of the document the worker belongs to, names lowercased.
    fn fetch_own_headers(&self) -> Result<BTreeMap<String, String>>;

    fn is_cross_origin_isolated(&self) -> bool;
}

pub fn probe<H: Host + ?Sized>(host: &H) -> Diagnostics {
    let secure_context = host.is_secure_context();

    let root = host.storage_root();
    let durable_api_present = root.is_some();
    let durable_api_accessible = root.as_deref().is_some_and(write_probe_file);

    let storage_estimate = match host.storage_estimate() {
        Some(Ok(estimate)) => Some(estimate),
        Some(Err(e)) => {
            tracing::warn!("Storage estimate failed: {}", e);
            None
        },
        None => None,
    };

    let isolation_headers = match host.fetch_own_headers() {
        Ok(headers) => Some(IsolationHeaders {
            cross_origin_opener_policy: headers.get("cross-origin-opener-policy").cloned(),
            cross_origin_embedder_policy: headers.get("cross-origin-embedder-policy").cloned(),
        }),
        Err(e) => {
            tracing::debug!("Header probe skipped: {}", e);
            None
        },
    };

    let diagnostics = Diagnostics {
        secure_context,
        durable_api_present,
        durable_api_accessible,
        storage_estimate,
        isolation_headers,
        cross_origin_isolated: host.is_cross_origin_isolated(),
    };
    tracing::info!(?diagnostics, "Storage capability probe complete");
    diagnostics
}

/// Create and remove a throwaway file under `root`.
///
/// Only creation decides the outcome; a probe file that cannot be removed is
/// left behind as an empty marker.
fn write_probe_file(root: &Path) -> bool {
    if let Err(e) = fs::create_dir_all(root) {
        tracing::warn!(root = %root.display(), "Cannot create storage root: {}", e);
        return false;
    }
    let probe_path = root.join(format!(".localstore-probe-{}", uuid::Uuid::new_v4()));
    match fs::File::create(&probe_path) {
        Ok(_) => {
            if let Err(e) = fs::remove_file(&probe_path) {
                tracing::debug!(path = %probe_path.display(), "Probe file left behind: {}", e);
            }
            true
        },
        Err(e) => {
            tracing::warn!(root = %root.display(), "Storage root is not writable: {}", e);
            false
        },
    }
}

/// Host settings for a native process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub secure_context: bool,
    pub cross_origin_isolated: bool,
    pub storage_root: Option<PathBuf>,
    pub quota_bytes: Option<u64>,
    /// URL fetched to read the isolation headers.
    pub document_url: Option<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            secure_context: true,
            cross_origin_isolated: true,
            storage_root: crate::config::default_data_dir(),
            quota_bytes: None,
            document_url: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NativeHost {
    config: HostConfig,
}

impl NativeHost {
    pub fn new(config: HostConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }
}

impl Host for NativeHost {
    fn is_secure_context(&self) -> bool {
        self.config.secure_context
    }

    fn storage_root(&self) -> Option<PathBuf> {
        self.config.storage_root.clone()
    }

    fn storage_estimate(&self) -> Option<io::Result<StorageEstimate>> {
        let root = self.config.storage_root.as_deref()?;
        Some(dir_usage(root).map(|usage| StorageEstimate {
            quota: self.config.quota_bytes,
            usage: Some(usage),
        }))
    }

    fn fetch_own_headers(&self) -> Result<BTreeMap<String, String>> {
        let url = self
            .config
            .document_url
            .as_deref()
            .ok_or_else(|| StoreError::Config("no document URL configured".to_owned()))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(HEADER_FETCH_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Config(format!("http client: {e}")))?;
        let response = client
            .get(url)
            .send()
            .map_err(|e| StoreError::Io(io::Error::other(e)))?;

        Ok(response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_ascii_lowercase(), v.to_owned()))
            })
            .collect())
    }

    fn is_cross_origin_isolated(&self) -> bool {
        self.config.cross_origin_isolated
    }
}

/// Total size in bytes of the regular files below `dir`.
fn dir_usage(dir: &Path) -> io::Result<u64> {
    let mut total = 0u64;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total = total.saturating_add(dir_usage(&entry.path())?);
        } else if meta.is_file() {
            total = total.saturating_add(meta.len());
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FakeHost {
        secure: bool,
        isolated: bool,
        root: Option<PathBuf>,
        estimate: Option<io::Result<StorageEstimate>>,
        headers: Option<BTreeMap<String, String>>,
    }

    impl FakeHost {
        fn new(root: Option<PathBuf>) -> Self {
            Self { secure: true, isolated: true, root, estimate: None, headers: None }
        }
    }

    impl Host for FakeHost {
        fn is_secure_context(&self) -> bool {
            self.secure
        }

        fn storage_root(&self) -> Option<PathBuf> {
            self.root.clone()
        }

        fn storage_estimate(&self) -> Option<io::Result<StorageEstimate>> {
            match &self.estimate {
                None => None,
                Some(Ok(e)) => Some(Ok(e.clone())),
                Some(Err(e)) => Some(Err(io::Error::new(e.kind(), e.to_string()))),
            }
        }

        fn fetch_own_headers(&self) -> Result<BTreeMap<String, String>> {
            self.headers.clone().ok_or_else(|| StoreError::Io(io::Error::other("offline")))
        }

        fn is_cross_origin_isolated(&self) -> bool {
            self.isolated
        }
    }

    #[test]
    fn test_accessible_root() {
        let dir = TempDir::new().unwrap();
        let diagnostics = probe(&FakeHost::new(Some(dir.path().join("store"))));
        assert!(diagnostics.durable_api_present);
        assert!(diagnostics.durable_api_accessible);
        // Probe file cleaned up.
        assert_eq!(fs::read_dir(dir.path().join("store")).unwrap().count(), 0);
    }

    #[test]
    fn test_present_but_inaccessible_root() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();
        let diagnostics = probe(&FakeHost::new(Some(blocker.join("store"))));
        assert!(diagnostics.durable_api_present);
        assert!(!diagnostics.durable_api_accessible);
    }

    #[test]
    fn test_absent_api() {
        let diagnostics = probe(&FakeHost::new(None));
        assert!(!diagnostics.durable_api_present);
        assert!(!diagnostics.durable_api_accessible);
    }

    #[test]
    fn test_failures_degrade_to_none() {
        let mut host = FakeHost::new(None);
        host.estimate = Some(Err(io::Error::other("denied")));
        host.secure = false;
        host.isolated = false;
        let diagnostics = probe(&host);
        assert_eq!(diagnostics.storage_estimate, None);
        assert_eq!(diagnostics.isolation_headers, None);
        assert!(!diagnostics.secure_context);
        assert!(!diagnostics.cross_origin_isolated);
    }

    #[test]
    fn test_headers_and_estimate_recorded() {
        let mut host = FakeHost::new(None);
        host.estimate = Some(Ok(StorageEstimate { quota: Some(1024), usage: Some(10) }));
        let mut headers = BTreeMap::new();
        headers.insert("cross-origin-opener-policy".to_owned(), "same-origin".to_owned());
        headers.insert("content-type".to_owned(), "text/html".to_owned());
        host.headers = Some(headers);

        let diagnostics = probe(&host);
        assert_eq!(diagnostics.storage_estimate.unwrap().quota, Some(1024));
        let isolation = diagnostics.isolation_headers.unwrap();
        assert_eq!(isolation.cross_origin_opener_policy.as_deref(), Some("same-origin"));
        assert_eq!(isolation.cross_origin_embedder_policy, None);
    }

    #[test]
    fn test_native_host_estimate_counts_files() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("a.bin"), [0u8; 100]).unwrap();
        fs::write(dir.path().join("nested/b.bin"), [0u8; 28]).unwrap();
        let host = NativeHost::new(HostConfig {
            storage_root: Some(dir.path().to_path_buf()),
            quota_bytes: Some(4096),
            ..HostConfig::default()
        });
        let estimate = host.storage_estimate().unwrap().unwrap();
        assert_eq!(estimate.usage, Some(128));
        assert_eq!(estimate.quota, Some(4096));
    }

    #[test]
    fn test_native_host_without_url_records_null_headers() {
        let host = NativeHost::new(HostConfig { storage_root: None, ..HostConfig::default() });
        assert!(host.fetch_own_headers().is_err());
        let diagnostics = probe(&host);
        assert_eq!(diagnostics.isolation_headers, None);
        assert_eq!(diagnostics.storage_estimate, None);
    }
}

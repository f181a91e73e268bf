//! Configuration of the batch service.
//!
//! Loaded from camelCase JSON or from properties text; missing keys keep
//! their defaults.

use crate::error::{Error, Result};
use crate::signatures::params::{get, get_bool, get_int, parse_properties};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Batch service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Run the tasks of a batch on a thread pool instead of in order.
    pub concurrent_mode: bool,

    /// Size of the pool used in concurrent mode.
    pub worker_threads: usize,

    /// Value of the `Access-Control-Allow-Origin` response header.
    pub access_control_allow_origin: String,

    /// Verify returned PKCS#1 signatures before embedding them.
    pub check_signature_hash: bool,

    /// TSA timeout for tasks whose extra parameters set none.
    pub tsa_timeout_secs: u64,

    /// Validate every signed document before reporting it as saved.
    pub validate_after_post: bool,

    /// Validation after POST may ask for confirmation instead of failing.
    pub relaxed_validation: bool,

    /// Seconds a presigned batch waits for its signatures before it is
    /// discarded.
    pub transaction_ttl_secs: u64,

    /// Directories `file://` data references may read from. Empty refuses
    /// every file reference.
    pub file_data_dirs: Vec<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceConfig {
    /// Create new configuration with defaults.
    pub fn new() -> Self {
        Self {
            concurrent_mode: false,
            worker_threads: 4,
            access_control_allow_origin: "*".to_string(),
            check_signature_hash: true,
            tsa_timeout_secs: 30,
            validate_after_post: false,
            relaxed_validation: false,
            transaction_ttl_secs: 600,
            file_data_dirs: Vec::new(),
        }
    }

    /// Run batch tasks concurrently.
    pub fn with_concurrent_mode(mut self, enable: bool) -> Self {
        self.concurrent_mode = enable;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.access_control_allow_origin = origin.into();
        self
    }

    /// Verify PKCS#1 signatures returned by the client.
    pub fn with_signature_hash_check(mut self, enable: bool) -> Self {
        self.check_signature_hash = enable;
        self
    }

    pub fn with_tsa_timeout(mut self, secs: u64) -> Self {
        self.tsa_timeout_secs = secs;
        self
    }

    /// Validate signed documents before saving them.
    pub fn with_validation_after_post(mut self, enable: bool) -> Self {
        self.validate_after_post = enable;
        self
    }

    pub fn with_relaxed_validation(mut self, enable: bool) -> Self {
        self.relaxed_validation = enable;
        self
    }

    /// Discard presigned batches not posted within `secs`.
    pub fn with_transaction_ttl(mut self, secs: u64) -> Self {
        self.transaction_ttl_secs = secs;
        self
    }

    /// Allow `file://` data references below `dir`.
    pub fn with_file_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.file_data_dirs.push(dir.into());
        self
    }

    pub fn transaction_ttl(&self) -> Duration {
        Duration::from_secs(self.transaction_ttl_secs)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.checked()
    }

    /// Load from properties text using the JSON key names.
    pub fn from_properties(text: &str) -> Result<Self> {
        let props = parse_properties(text);
        let mut config = Self::new();
        if let Some(v) = get_bool(&props, "concurrentMode") {
            config.concurrent_mode = v;
        }
        if let Some(v) = get_int(&props, "workerThreads") {
            config.worker_threads = usize::try_from(v).map_err(|_| Error::parameter("workerThreads", "must not be negative"))?;
        }
        if let Some(v) = get(&props, "accessControlAllowOrigin") {
            config.access_control_allow_origin = v.to_string();
        }
        if let Some(v) = get_bool(&props, "checkSignatureHash") {
            config.check_signature_hash = v;
        }
        if let Some(v) = get_int(&props, "tsaTimeoutSecs") {
            config.tsa_timeout_secs = u64::try_from(v).map_err(|_| Error::parameter("tsaTimeoutSecs", "must not be negative"))?;
        }
        if let Some(v) = get_bool(&props, "validateAfterPost") {
            config.validate_after_post = v;
        }
        if let Some(v) = get_bool(&props, "relaxedValidation") {
            config.relaxed_validation = v;
        }
        if let Some(v) = get_int(&props, "transactionTtlSecs") {
            config.transaction_ttl_secs =
                u64::try_from(v).map_err(|_| Error::parameter("transactionTtlSecs", "must not be negative"))?;
        }
        // Separated like PATH
        if let Some(v) = get(&props, "fileDataDirs") {
            config.file_data_dirs = std::env::split_paths(v).filter(|p| !p.as_os_str().is_empty()).collect();
        }
        config.checked()
    }

    fn checked(self) -> Result<Self> {
        if self.worker_threads == 0 {
            return Err(Error::parameter("workerThreads", "must be at least 1"));
        }
        if self.tsa_timeout_secs == 0 {
            return Err(Error::parameter("tsaTimeoutSecs", "must be at least 1"));
        }
        if self.transaction_ttl_secs == 0 {
            return Err(Error::parameter("transactionTtlSecs", "must be at least 1"));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert!(!config.concurrent_mode);
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.access_control_allow_origin, "*");
        assert!(config.check_signature_hash);
        assert!(!config.validate_after_post);
        assert_eq!(config.transaction_ttl(), Duration::from_secs(600));
        assert!(config.file_data_dirs.is_empty());
    }

    #[test]
    fn test_builder() {
        let config = ServiceConfig::new()
            .with_concurrent_mode(true)
            .with_worker_threads(2)
            .with_allow_origin("https://sede.example.es")
            .with_signature_hash_check(false)
            .with_tsa_timeout(5)
            .with_validation_after_post(true)
            .with_relaxed_validation(true)
            .with_transaction_ttl(60)
            .with_file_data_dir("/srv/documents");
        assert!(config.concurrent_mode);
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.access_control_allow_origin, "https://sede.example.es");
        assert!(!config.check_signature_hash);
        assert_eq!(config.tsa_timeout_secs, 5);
        assert!(config.validate_after_post && config.relaxed_validation);
        assert_eq!(config.transaction_ttl_secs, 60);
        assert_eq!(config.file_data_dirs, vec![PathBuf::from("/srv/documents")]);
    }

    #[test]
    fn test_json_keeps_defaults_for_missing_keys() {
        let config = ServiceConfig::from_json(r#"{"concurrentMode": true, "workerThreads": 8}"#).unwrap();
        assert!(config.concurrent_mode);
        assert_eq!(config.worker_threads, 8);
        assert_eq!(config.tsa_timeout_secs, 30);
        assert!(config.check_signature_hash);
        assert!(config.file_data_dirs.is_empty());

        let config = ServiceConfig::from_json(r#"{"transactionTtlSecs": 30, "fileDataDirs": ["/srv/in"]}"#).unwrap();
        assert_eq!(config.transaction_ttl_secs, 30);
        assert_eq!(config.file_data_dirs, vec![PathBuf::from("/srv/in")]);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["accessControlAllowOrigin"], "*");
    }

    #[test]
    fn test_properties() {
        let config = ServiceConfig::from_properties(
            "# batch\nconcurrentMode=true\nworkerThreads=3\ncheckSignatureHash=false\nvalidateAfterPost=true\n\
             transactionTtlSecs=120\n",
        )
        .unwrap();
        assert!(config.concurrent_mode);
        assert_eq!(config.worker_threads, 3);
        assert!(!config.check_signature_hash);
        assert!(config.validate_after_post);
        assert_eq!(config.access_control_allow_origin, "*");
        assert_eq!(config.transaction_ttl_secs, 120);
    }

    #[cfg(unix)]
    #[test]
    fn test_properties_file_data_dirs() {
        let config = ServiceConfig::from_properties("fileDataDirs=/srv/in:/srv/archive").unwrap();
        assert_eq!(config.file_data_dirs, vec![PathBuf::from("/srv/in"), PathBuf::from("/srv/archive")]);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            ServiceConfig::from_properties("workerThreads=0"),
            Err(Error::InvalidParameter { .. })
        ));
        assert!(ServiceConfig::from_properties("workerThreads=-2").is_err());
        assert!(ServiceConfig::from_properties("transactionTtlSecs=0").is_err());
        assert!(ServiceConfig::from_properties("transactionTtlSecs=-1").is_err());
        assert!(ServiceConfig::from_json(r#"{"workerThreads": "many"}"#).is_err());
    }
}

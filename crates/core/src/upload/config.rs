//! Configuration for the upload orchestrator.

use serde::{Deserialize, Serialize};

/// Upload limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Largest accepted file in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    /// Files beyond this many are dropped from a submission.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Simultaneous uploads.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Accepted file extensions, compared case-insensitively.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_max_batch_size() -> usize {
    20
}

fn default_max_concurrency() -> usize {
    3
}

fn default_allowed_extensions() -> Vec<String> {
    vec!["pdf".to_string()]
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size(),
            max_batch_size: default_max_batch_size(),
            max_concurrency: default_max_concurrency(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl UploadConfig {
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size_bytes = bytes;
        self
    }

    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_allowed_extensions(mut self, extensions: &[&str]) -> Self {
        self.allowed_extensions = extensions.iter().map(|e| e.to_string()).collect();
        self
    }

    /// Whether `extension` (without the dot) is accepted.
    pub fn allows_extension(&self, extension: &str) -> bool {
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(extension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = UploadConfig::default();
        assert_eq!(config.max_file_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.max_batch_size, 20);
        assert_eq!(config.max_concurrency, 3);
        assert!(config.allows_extension("pdf"));
        assert!(config.allows_extension("PDF"));
        assert!(!config.allows_extension("png"));
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: UploadConfig = toml::from_str("max_batch_size = 5").unwrap();
        assert_eq!(config.max_batch_size, 5);
        assert_eq!(config.max_concurrency, 3);
    }

    #[test]
    fn test_builders() {
        let config = UploadConfig::default()
            .with_max_batch_size(2)
            .with_allowed_extensions(&[".pdf", "xml"]);
        assert_eq!(config.max_batch_size, 2);
        assert!(config.allows_extension("xml"));
        assert!(config.allows_extension("pdf"));
    }
}

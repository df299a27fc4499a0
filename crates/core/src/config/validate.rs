use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Upload and export concurrency, batch size and file size limit are not 0
/// - Event bus capacity is not 0
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let zero_checks: [(&str, bool); 6] = [
        ("server.port", config.server.port == 0),
        ("upload.max_concurrency", config.upload.max_concurrency == 0),
        ("upload.max_batch_size", config.upload.max_batch_size == 0),
        (
            "upload.max_file_size_bytes",
            config.upload.max_file_size_bytes == 0,
        ),
        ("export.max_concurrency", config.export.max_concurrency == 0),
        ("events.capacity", config.events.capacity == 0),
    ];

    if let Some((key, _)) = zero_checks.iter().find(|(_, is_zero)| *is_zero) {
        return Err(ConfigError::ValidationError(format!("{} cannot be 0", key)));
    }

    if config.upload.allowed_extensions.is_empty() {
        return Err(ConfigError::ValidationError(
            "upload.allowed_extensions cannot be empty".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = Config::default();
        config.server.port = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(ref m) if m.contains("server.port")));
    }

    #[test]
    fn test_validate_zero_limits_fail() {
        let mut config = Config::default();
        config.export.max_concurrency = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.upload.max_batch_size = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.events.capacity = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.upload.allowed_extensions.clear();
        assert!(validate_config(&config).is_err());
    }
}

use crate::config::types::RunConfig;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(RunConfig)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use page_harvest::config::load_config;
///
/// let config = load_config(Path::new("harvest.toml")).unwrap();
/// println!("Concurrency: {}", config.run.concurrency);
/// ```
pub fn load_config(path: &Path) -> Result<RunConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: RunConfig = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Writes a configuration back to disk
///
/// The configuration is validated first so an invalid edit never replaces a
/// working file.
pub fn save_config(config: &RunConfig, path: &Path) -> Result<(), ConfigError> {
    validate(config)?;
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Hashes a configuration by its canonical TOML form
///
/// Stored alongside each run so runs with different settings can be told
/// apart. Formatting and comments in the file do not affect it.
pub fn hash_config(config: &RunConfig) -> Result<String, ConfigError> {
    let content = toml::to_string(config)?;
    Ok(hash_content(&content))
}

fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Loads a configuration and returns both the config and its hash
///
/// The hash is the one [`hash_config`] gives, i.e. the one a run records.
pub fn load_config_with_hash(path: &Path) -> Result<(RunConfig, String), ConfigError> {
    let config = load_config(path)?;
    let hash = hash_config(&config)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let config_content = r#"
[run]
concurrency = 3
delay-min-ms = 100
delay-max-ms = 300
start-page = 2
max-pages = 10

[source]
url-template = "https://example.com/herbs?page={page}"

[output]
export-root = "./out"
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.run.concurrency, 3);
        assert_eq!(config.run.start_page, 2);
        assert_eq!(config.run.max_pages, 10);
        assert_eq!(config.output.export_root, "./out");
        // Omitted sections and keys fall back to defaults
        assert_eq!(config.fetch.max_retries, 3);
        assert_eq!(config.fetch.timeout_secs, 30);
        assert_eq!(config.output.top_tags, 20);
        assert!(!config.source.accept_invalid_certs);
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/harvest.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let config_content = r#"
[run]
concurrency = 0

[source]
url-template = "https://example.com/herbs?page={page}"
"#;

        let file = create_temp_config(config_content);
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_save_then_load_preserves_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("harvest.toml");

        let mut config = RunConfig::default();
        config.run.set("concurrency", "7").unwrap();
        config.run.set("start-page", "5").unwrap();
        save_config(&config, &path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.run.concurrency, 7);
    }

    #[test]
    fn test_save_refuses_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.toml");

        let mut config = RunConfig::default();
        config.run.concurrency = 0;
        assert!(save_config(&config, &path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_loaded_hash_matches_hash_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.toml");
        save_config(&RunConfig::default(), &path).unwrap();

        let (config, hash) = load_config_with_hash(&path).unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_config(&config).unwrap());

        // Comments and layout do not change the fingerprint
        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, format!("# harvest settings\n\n{}", content)).unwrap();
        let (_, reformatted) = load_config_with_hash(&path).unwrap();
        assert_eq!(reformatted, hash);
    }

    #[test]
    fn test_hash_config_tracks_changes() {
        let config = RunConfig::default();
        let mut changed = config.clone();
        changed.run.concurrency += 1;

        assert_eq!(hash_config(&config).unwrap(), hash_config(&config).unwrap());
        assert_ne!(hash_config(&config).unwrap(), hash_config(&changed).unwrap());
    }
}

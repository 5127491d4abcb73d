use crate::config::types::{FetchConfig, OutputConfig, RunConfig, RunSettings, SourceConfig};
use crate::ConfigError;
use url::Url;

/// Upper bound for the worker pool size
const MAX_CONCURRENCY: u32 = 64;

/// Validates the entire configuration
pub fn validate(config: &RunConfig) -> Result<(), ConfigError> {
    validate_run_settings(&config.run)?;
    validate_source_config(&config.source)?;
    validate_fetch_config(&config.fetch)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates scheduling parameters
fn validate_run_settings(run: &RunSettings) -> Result<(), ConfigError> {
    if run.concurrency < 1 || run.concurrency > MAX_CONCURRENCY {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and {}, got {}",
            MAX_CONCURRENCY, run.concurrency
        )));
    }

    if run.delay_min_ms > run.delay_max_ms {
        return Err(ConfigError::Validation(format!(
            "delay-min-ms ({}) must not exceed delay-max-ms ({})",
            run.delay_min_ms, run.delay_max_ms
        )));
    }

    if run.start_page < 1 {
        return Err(ConfigError::Validation(
            "start-page must be >= 1".to_string(),
        ));
    }

    if run.max_pages == 0 || run.max_pages < -1 {
        return Err(ConfigError::Validation(format!(
            "max-pages must be -1 (unbounded) or >= 1, got {}",
            run.max_pages
        )));
    }

    if run.default_total_pages == Some(0) {
        return Err(ConfigError::Validation(
            "default-total-pages must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates the source URL template
fn validate_source_config(source: &SourceConfig) -> Result<(), ConfigError> {
    if !source.url_template.contains("{page}") {
        return Err(ConfigError::Validation(format!(
            "url-template must contain a {{page}} placeholder, got '{}'",
            source.url_template
        )));
    }

    let sample = source.url_template.replace("{page}", "1");
    let url = Url::parse(&sample)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid url-template: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "url-template must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if source.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates fetcher retry settings
fn validate_fetch_config(fetch: &FetchConfig) -> Result<(), ConfigError> {
    if fetch.max_retries < 1 {
        return Err(ConfigError::Validation(
            "max-retries must be >= 1".to_string(),
        ));
    }

    if fetch.timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "timeout-secs must be >= 1".to_string(),
        ));
    }

    if fetch.jitter_min_ms > fetch.jitter_max_ms {
        return Err(ConfigError::Validation(format!(
            "jitter-min-ms ({}) must not exceed jitter-max-ms ({})",
            fetch.jitter_min_ms, fetch.jitter_max_ms
        )));
    }

    Ok(())
}

/// Validates sink locations
fn validate_output_config(output: &OutputConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("document-store-path", &output.document_store_path),
        ("index-path", &output.index_path),
        ("export-root", &output.export_root),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
        }
    }

    if output.top_tags < 1 {
        return Err(ConfigError::Validation("top-tags must be >= 1".to_string()));
    }

    Ok(())
}

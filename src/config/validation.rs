use crate::config::types::{
    CaptureConfig, Config, InputConfig, OutputConfig, PerUrl, RendererConfig, Source,
};
use crate::input::InputKind;
use crate::ConfigError;
use std::collections::HashSet;
use std::path::{Component, Path};

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_input_config(&config.input)?;
    validate_output_config(&config.output)?;
    validate_capture_config(&config.capture)?;
    validate_renderer_config(&config.renderer)?;
    Ok(())
}

/// Validates the input source against the selected generator
fn validate_input_config(config: &InputConfig) -> Result<(), ConfigError> {
    match (&config.kind, &config.source) {
        (InputKind::Array, Source::Many(urls)) if urls.is_empty() => {
            return Err(ConfigError::Validation(
                "array input requires at least one URL".to_string(),
            ));
        }
        (InputKind::Array, _) => {}
        (kind, Source::Many(_)) => {
            return Err(ConfigError::Validation(format!(
                "{} input requires a single source location",
                kind
            )));
        }
        (kind, Source::One(location)) if location.trim().is_empty() => {
            return Err(ConfigError::Validation(format!(
                "{} input requires a source location",
                kind
            )));
        }
        _ => {}
    }

    if config.protocol != "http" && config.protocol != "https" {
        return Err(ConfigError::Validation(format!(
            "protocol must be http or https, got '{}'",
            config.protocol
        )));
    }

    if config.hostname.is_empty() {
        return Err(ConfigError::Validation(
            "hostname cannot be empty".to_string(),
        ));
    }

    // The hostname must form a valid base URL
    let base = format!("{}://{}/", config.protocol, config.hostname);
    url::Url::parse(&base)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid hostname '{}': {}", config.hostname, e)))?;

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.dir.trim().is_empty() {
        return Err(ConfigError::Validation(
            "output dir is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for (key, relative) in &config.paths {
        if !is_plain_relative(Path::new(relative)) {
            return Err(ConfigError::Validation(format!(
                "output path for '{}' must be relative and stay inside the output dir, got '{}'",
                key, relative
            )));
        }
        if !seen.insert(Path::new(relative).to_path_buf()) {
            return Err(ConfigError::DuplicateOutput(config.dir().join(relative)));
        }
    }

    Ok(())
}

/// Validates capture timing settings
fn validate_capture_config(config: &CaptureConfig) -> Result<(), ConfigError> {
    validate_positive("timeout", &config.timeout)?;
    validate_positive("check-interval", &config.check_interval)?;

    if config.poll_interval == 0 {
        return Err(ConfigError::Validation(
            "poll-interval must be positive".to_string(),
        ));
    }

    for selector in config.selector.values() {
        if selector.trim().is_empty() {
            return Err(ConfigError::Validation(
                "selector cannot be empty".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates the renderer invocation
fn validate_renderer_config(config: &RendererConfig) -> Result<(), ConfigError> {
    if config.program.trim().is_empty() {
        return Err(ConfigError::Validation(
            "renderer program cannot be empty".to_string(),
        ));
    }

    if let Some(script) = &config.snapshot_script {
        if !script.is_file() {
            return Err(ConfigError::MissingScript(script.clone()));
        }
    }

    Ok(())
}

fn validate_positive(name: &str, value: &PerUrl<u64>) -> Result<(), ConfigError> {
    if value.values().any(|v| *v == 0) {
        return Err(ConfigError::Validation(format!(
            "{} must be positive",
            name
        )));
    }
    Ok(())
}

/// True for relative paths without `..` or root components
fn is_plain_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

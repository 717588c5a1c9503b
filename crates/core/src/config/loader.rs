//! Settings file loader.
//!
//! The host hands the manager an explicit path; the format is picked from the
//! extension:
//! - `*.toml`: TOML
//! - `*.yaml` / `*.yml`: YAML
//!
//! Missing fields fall back to [`ManagerSettings::default`].

use crate::config::error::ConfigError;
use crate::config::error::ConfigResult;
use crate::config::models::ManagerConfig;
use pv_protocol::config_models::ManagerSettings;
use std::path::Path;

/// Loads and validates manager settings from a TOML or YAML file.
///
/// # Arguments
///
/// * `path` - Path of the settings file
///
/// # Errors
///
/// Returns `ConfigError` if:
/// - The file cannot be read
/// - The extension is not `.toml`, `.yaml` or `.yml`
/// - The content has invalid syntax
/// - A value is out of range (see [`validate_settings`])
///
/// # Example
///
/// ```rust,no_run
/// use pv_core::config::loader::load_settings;
/// use std::path::Path;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let settings = load_settings(Path::new("procvisor.toml"))?;
/// println!("resync every {} ms", settings.resync_interval_ms);
/// # Ok(())
/// # }
/// ```
pub fn load_settings(path: &Path) -> ConfigResult<ManagerSettings> {
    let format = SettingsFormat::from_path(path)?;

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let settings: ManagerSettings = match format {
        SettingsFormat::Toml => {
            toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
                path: path.to_path_buf(),
                source,
            })?
        }
        SettingsFormat::Yaml => {
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlParse {
                path: path.to_path_buf(),
                source,
            })?
        }
    };

    validate_settings(&settings, path)?;
    Ok(settings)
}

/// Loads a settings file and converts it into a [`ManagerConfig`].
pub fn load_config(path: &Path) -> ConfigResult<ManagerConfig> {
    let settings = load_settings(path)?;
    Ok(ManagerConfig::from(&settings))
}

/// Checks that settings hold values the manager can run with.
///
/// # Errors
///
/// Returns `ConfigError::InvalidConfig` naming the first offending field:
/// - `jitter_fraction` outside `[0, 1]`
/// - a zero resync, transient retry or backoff base interval
/// - `backoff_ceiling_ms` below `backoff_base_ms`
/// - a zero grace period or unhealthy threshold
pub fn validate_settings(settings: &ManagerSettings, path: &Path) -> ConfigResult<()> {
    let invalid = |reason: String| ConfigError::InvalidConfig {
        path: path.to_path_buf(),
        reason,
    };

    if !(0.0..=1.0).contains(&settings.jitter_fraction) {
        return Err(invalid(format!(
            "jitter_fraction must be within [0, 1], got {}",
            settings.jitter_fraction
        )));
    }

    for (field, value) in [
        ("resync_interval_ms", settings.resync_interval_ms),
        ("transient_retry_ms", settings.transient_retry_ms),
        ("backoff_base_ms", settings.backoff_base_ms),
        ("default_grace_period_secs", settings.default_grace_period_secs),
    ] {
        if value == 0 {
            return Err(invalid(format!("{} must be greater than zero", field)));
        }
    }

    if settings.backoff_ceiling_ms < settings.backoff_base_ms {
        return Err(invalid(format!(
            "backoff_ceiling_ms ({}) is below backoff_base_ms ({})",
            settings.backoff_ceiling_ms, settings.backoff_base_ms
        )));
    }

    if settings.unhealthy_error_threshold == 0 {
        return Err(invalid(
            "unhealthy_error_threshold must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

enum SettingsFormat {
    Toml,
    Yaml,
}

impl SettingsFormat {
    fn from_path(path: &Path) -> ConfigResult<Self> {
        match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("yaml") | Some("yml") => Ok(Self::Yaml),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

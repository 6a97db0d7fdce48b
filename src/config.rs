use std::path::{Path, PathBuf};

use crate::patterns::{AnalysisConfig, PatternError};

/// Application-level constants
pub const APP_NAME: &str = "Folia";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the application data directory
/// ~/Folia/ on all platforms; the working directory if no home is known.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(APP_NAME)
}

/// SQLite database holding events and alerts
pub fn database_path() -> PathBuf {
    app_data_dir().join("folia.db")
}

/// Optional JSON overrides for the pattern engine
pub fn analysis_config_path() -> PathBuf {
    app_data_dir().join("analysis.json")
}

/// Used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "folia=info,folia_lib=info"
}

/// Read an `AnalysisConfig` from JSON. Missing keys take their defaults and
/// a missing file means all defaults. The result is always validated.
pub fn load_analysis_config(path: &Path) -> Result<AnalysisConfig, PatternError> {
    let config = match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<AnalysisConfig>(&raw).map_err(|e| {
            PatternError::Configuration(format!("{}: {e}", path.display()))
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No analysis config, using defaults");
            AnalysisConfig::default()
        }
        Err(e) => {
            return Err(PatternError::Configuration(format!(
                "cannot read {}: {e}",
                path.display()
            )))
        }
    };
    config.validate()?;
    Ok(config)
}

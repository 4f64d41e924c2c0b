use crate::Result;
use camino::{Utf8Path, Utf8PathBuf};
use ohno::{IntoAppError, app_err};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;

/// The default configuration TOML content, embedded from `default_config.toml`
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../default_config.toml");

/// The file looked up in the working directory when no configuration is given
pub const CONFIG_FILE_NAME: &str = "admitctl.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Report failures of `Audit` policies as warnings
    #[serde(default)]
    pub audit_warn: bool,

    /// List every rule outcome after the summary
    #[serde(default)]
    pub detailed_results: bool,

    /// File or directory receiving mutated and generated resources
    #[serde(default)]
    pub mutate_log_path: Option<Utf8PathBuf>,

    /// Context document seeding offline CEL evaluation
    #[serde(default)]
    pub context_path: Option<Utf8PathBuf>,
}

impl Config {
    /// Load configuration from a file or use defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn load(base_dir: &Utf8Path, config_path: Option<&Utf8PathBuf>) -> Result<Self> {
        let (final_path, text) = if let Some(path) = config_path {
            let text = fs::read_to_string(path).into_app_err_with(|| format!("reading admitctl configuration file '{path}'"))?;
            (path.clone(), text)
        } else {
            let path = base_dir.join(CONFIG_FILE_NAME);
            match fs::read_to_string(&path) {
                Ok(text) => (path, text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // No config file found, use defaults
                    return Ok(Self::default());
                }
                Err(e) => return Err(e).into_app_err_with(|| format!("reading admitctl configuration file '{path}'")),
            }
        };

        let config: Self = toml::from_str(&text).into_app_err_with(|| format!("parsing configuration file '{final_path}'"))?;
        config.validate()?;

        Ok(config)
    }

    /// Save the default configuration to a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written
    pub fn save_default(output_path: &Utf8Path) -> Result<()> {
        fs::write(output_path, DEFAULT_CONFIG_TOML).into_app_err_with(|| format!("writing default configuration to {output_path}"))?;
        Ok(())
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns an error if a configured path is empty
    fn validate(&self) -> Result<()> {
        if self.mutate_log_path.as_ref().is_some_and(|path| path.as_str().trim().is_empty()) {
            return Err(app_err!("mutate_log_path must not be empty"));
        }

        if self.context_path.as_ref().is_some_and(|path| path.as_str().trim().is_empty()) {
            return Err(app_err!("context_path must not be empty"));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("default_config.toml should be valid TOML that deserializes to Config")
    }
}

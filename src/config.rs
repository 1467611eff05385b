//! Configuration of the saver.
//!
//! Every value has a default, so the application starts without any configuration
//! file. Values are layered, the last one winning:
//!
//! 1. Built-in defaults
//! 2. The optional YAML file given with `--config`
//! 3. `SAVEIT_` environment variables, `__` separating sections from keys
//!
//! # Configuration File Format
//!
//! ```yaml
//! # Prefill of the login form
//! telegram:
//!   api_id: 123456
//!   api_hash: "a1b2c3d4"
//!   phone_number: "+98912..."
//!
//! # Media saver behavior
//! saver:
//!   trigger: ".saveit"
//!   download_dir: "downloads"
//!   caption: "Saved via App"
//!   status_delete_delay: 3
//! ```
//!
//! ```bash
//! export SAVEIT_TELEGRAM__API_HASH="a1b2c3d4"
//! export SAVEIT_SAVER__TRIGGER="!save"
//! ```

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};

/// Prefix of the environment variables overriding the configuration.
const ENV_PREFIX: &str = "SAVEIT_";

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Values prefilled in the login form
    pub telegram: Telegram,
    /// Media saver settings
    pub saver: Saver,
}

impl Config {
    /// Loads the configuration from the defaults, the YAML file and the environment.
    ///
    /// A missing file is not an error: figment skips it and the defaults apply.
    ///
    /// # Arguments
    ///
    /// * `path` - Optional path to the YAML configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the file or an environment variable holds a value of the
    /// wrong type, e.g. a non numeric `api_id`.
    pub fn load(path: Option<&str>) -> Result<Config, Box<figment::Error>> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)
    }
}

/// Credentials prefilled in the login form.
///
/// All of them can still be edited in the window before connecting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Telegram {
    /// Application id from my.telegram.org
    pub api_id: Option<i32>,
    /// Application hash from my.telegram.org
    pub api_hash: Option<String>,
    /// Phone number of the account, in international format
    pub phone_number: Option<String>,
}

/// Media saver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Saver {
    /// Text that triggers a save when found in a reply
    pub trigger: String,

    /// Directory receiving downloaded media.
    ///
    /// Relative paths are resolved against the data directory.
    pub download_dir: String,

    /// Caption of the copy sent to Saved Messages
    pub caption: String,

    /// Seconds before the final status message is deleted
    pub status_delete_delay: u64,
}

impl Default for Saver {
    fn default() -> Self {
        Saver {
            trigger: ".saveit".to_owned(),
            download_dir: "downloads".to_owned(),
            caption: "Saved via App".to_owned(),
            status_delete_delay: 3,
        }
    }
}

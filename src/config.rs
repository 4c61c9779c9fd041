use std::{
    fmt::Debug,
    path::{Path, PathBuf},
};

use config::{Environment, File};
use serde::Deserialize;
use tracing::debug;

use crate::{
    outside::FFMPEG,
    result::{Error, Result},
};

/// Settings file looked up in the working directory when none is given
pub const DEFAULT_SETTINGS_FILE: &str = "clipcast.toml";
/// Prefix of the environment variables overriding the settings file
const ENV_PREFIX: &str = "CLIPCAST";
const ENV_SEPARATOR: &str = "__";

const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// A folder, an `ftp://` URL, or `telegram`
    #[serde(default)]
    pub destination: Option<String>,

    /// Parent of the per-item workspaces
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Where downloaded sources are kept between runs
    #[serde(default)]
    pub media_cache_dir: Option<PathBuf>,

    /// History database avoiding delivering an item twice
    #[serde(default)]
    pub history: Option<PathBuf>,

    #[serde(default)]
    pub transcoder: TranscoderSettings,

    #[serde(default)]
    pub provider: ProviderSettings,

    #[serde(default)]
    pub telegram: Option<TelegramSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscoderSettings {
    #[serde(default = "default_transcoder")]
    pub program: String,
}

impl Default for TranscoderSettings {
    fn default() -> Self {
        Self {
            program: default_transcoder(),
        }
    }
}

fn default_transcoder() -> String {
    FFMPEG.to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSettings {
    /// Downloader program, `yt-dlp` or `youtube-dl` from the PATH when unset
    #[serde(default)]
    pub program: Option<String>,
}

#[derive(Clone, Deserialize)]
pub struct TelegramSettings {
    pub token: String,
    pub chat_id: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

fn default_api_url() -> String {
    DEFAULT_TELEGRAM_API.to_string()
}

impl Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("token", &"<hidden>")
            .field("chat_id", &self.chat_id)
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl Settings {
    /// Load the settings file, then the `CLIPCAST__` environment overrides.
    ///
    /// An explicitly given file must exist, the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR);
        Self::load_from(path, env)
    }

    fn load_from(path: Option<&Path>, env: Environment) -> Result<Self> {
        let (file, required) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_SETTINGS_FILE), false),
        };
        debug!("Loading settings from {}", file.display());

        config::Config::builder()
            .add_source(File::from(file).required(required))
            .add_source(env)
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|err| Error::Config(err.to_string()))
    }
}

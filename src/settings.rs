use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::store::DEFAULT_CACHE_PATH;

pub const DEFAULT_BASE_URL: &str = "https://www.imdb.com";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Plain HTTP requests.
    Http,
    /// The Spider scraping API (needs an API key).
    Spider,
}

/// Runtime settings. Layered: built-in defaults, then an optional
/// `movie_finder.toml` in the working directory, then `MOVIE_FINDER_*`
/// environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub cache_path: PathBuf,
    pub base_url: String,
    pub backend: Backend,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub user_agent: String,
    pub spider_api_key: Option<String>,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(File::with_name("movie_finder").required(false))
            .add_source(Environment::with_prefix("MOVIE_FINDER"))
            .build()?
            .try_deserialize()
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("cache_path", DEFAULT_CACHE_PATH)?
            .set_default("base_url", DEFAULT_BASE_URL)?
            .set_default("backend", "http")?
            .set_default("timeout_secs", 20_i64)?
            .set_default("max_retries", 3_i64)?
            .set_default("user_agent", DEFAULT_USER_AGENT)
    }

    /// Spider key from settings, else the bare `SPIDER_API_KEY` variable.
    pub fn spider_key(&self) -> Option<String> {
        self.spider_api_key
            .clone()
            .or_else(|| std::env::var("SPIDER_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }
}

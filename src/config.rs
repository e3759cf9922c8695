use std::path::Path;

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::{count::DEFAULT_ESTIMATE_THRESHOLD, error::Result, transaction::IdentityPolicy, utils::get_config_dir};

pub const DEFAULT_PAGE_SIZE: u64 = 200;

const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "TABLE_CRAFTER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
  #[serde(default = "default_page_size")]
  pub page_size: u64,

  /// Unfiltered tables estimated above this many rows keep the estimate instead of COUNT(*).
  #[serde(default = "default_estimate_threshold")]
  pub estimate_threshold: u64,

  /// Updates and deletes on tables without a primary key.
  #[serde(default)]
  pub identity_policy: IdentityPolicy,

  /// Keep staged inserts when the page, sort or filters change.
  #[serde(default = "default_true")]
  pub preserve_inserts_on_navigation: bool,

  /// Serve repeated identical page requests from memory.
  #[serde(default)]
  pub cache_reads: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      page_size: default_page_size(),
      estimate_threshold: default_estimate_threshold(),
      identity_policy: IdentityPolicy::default(),
      preserve_inserts_on_navigation: true,
      cache_reads: false,
    }
  }
}

fn default_page_size() -> u64 {
  DEFAULT_PAGE_SIZE
}

fn default_estimate_threshold() -> u64 {
  DEFAULT_ESTIMATE_THRESHOLD
}

fn default_true() -> bool {
  true
}

impl Config {
  /// Defaults, then `config.toml` in the config directory if present, then `TABLE_CRAFTER_*` variables.
  pub fn new() -> Result<Self> {
    Self::load_from(&get_config_dir())
  }

  pub fn load_from(config_dir: &Path) -> Result<Self> {
    let config: Self = config::Config::builder()
      .add_source(File::from(config_dir.join(CONFIG_FILE)).format(FileFormat::Toml).required(false))
      .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
      .build()?
      .try_deserialize()?;
    tracing::debug!(?config, "loaded configuration");
    Ok(config)
  }

  pub fn from_toml_str(toml: &str) -> Result<Self> {
    let config = config::Config::builder()
      .add_source(File::from_str(toml, FileFormat::Toml))
      .build()?
      .try_deserialize()?;
    Ok(config)
  }
}

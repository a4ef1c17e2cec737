use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use chrono_tz::Tz;
use serde::{
  Deserialize,
  Serialize
};
use tracing::{
  debug,
  info,
  warn
};

use crate::datetime::{
  DateKeyer,
  default_timezone,
  parse_timezone
};

const CONFIG_FILE_NAME: &str =
  "almanac.toml";
const CONFIG_ENV_VAR: &str =
  "ALMANAC_CONFIG";
const TIMEZONE_ENV_VAR: &str =
  "ALMANAC_TIMEZONE";
const API_URL_ENV_VAR: &str =
  "ALMANAC_API_URL";

fn default_base_url() -> String {
  "http://localhost:5000".to_string()
}

fn default_timeout_secs() -> u64 {
  20
}

fn default_fetch_buffer_days() -> i64 {
  7
}

fn default_max_bulk_span_days() -> i64 {
  400
}

#[derive(
  Debug,
  Clone,
  Default,
  Serialize,
  Deserialize,
)]
#[serde(default)]
pub struct AlmanacConfig {
  pub time:        TimeConfig,
  pub api:         ApiConfig,
  pub grid:        GridConfig,
  pub state:       StateConfig,
  #[serde(skip)]
  pub loaded_file: Option<PathBuf>
}

#[derive(
  Debug,
  Clone,
  Default,
  Serialize,
  Deserialize,
)]
#[serde(default)]
pub struct TimeConfig {
  /// IANA id of the reference zone
  /// used for every day key.
  pub timezone: Option<String>
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url:     String,
  pub timeout_secs: u64
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url:     default_base_url(),
      timeout_secs: default_timeout_secs()
    }
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
#[serde(default)]
pub struct GridConfig {
  /// Days fetched beyond each edge of
  /// the rendered grid.
  pub fetch_buffer_days:  i64,
  /// Widest bulk request; wider grids
  /// fetch only the selected period and
  /// load phantom days lazily.
  pub max_bulk_span_days: i64
}

impl Default for GridConfig {
  fn default() -> Self {
    Self {
      fetch_buffer_days:
        default_fetch_buffer_days(),
      max_bulk_span_days:
        default_max_bulk_span_days()
    }
  }
}

#[derive(
  Debug,
  Clone,
  Default,
  Serialize,
  Deserialize,
)]
#[serde(default)]
pub struct StateConfig {
  pub period_file: Option<PathBuf>
}

impl AlmanacConfig {
  /// Loads the first config file found
  /// (explicit path, `ALMANAC_CONFIG`,
  /// `./almanac.toml`, then the user
  /// config dir) and applies environment
  /// overrides.
  #[tracing::instrument(skip(
    override_path
  ))]
  pub fn load(
    override_path: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = match resolve_config_path(
      override_path
    )? {
      | Some(path) => {
        info!(config = %path.display(), "loading config");
        Self::from_file(&path)?
      }
      | None => {
        warn!(
          "no config file found; using \
           defaults"
        );
        Self::default()
      }
    };

    cfg.apply_overrides(|key| {
      std::env::var(key).ok()
    });
    sanitize_config(&mut cfg);
    Ok(cfg)
  }

  pub fn from_toml_str(
    raw: &str
  ) -> anyhow::Result<Self> {
    let mut cfg: Self =
      toml::from_str(raw)
        .context("failed parsing config")?;
    sanitize_config(&mut cfg);
    Ok(cfg)
  }

  fn from_file(
    path: &Path
  ) -> anyhow::Result<Self> {
    let raw = fs::read_to_string(path)
      .with_context(|| {
        format!(
          "failed to read {}",
          path.display()
        )
      })?;
    let mut cfg = Self::from_toml_str(
      &raw
    )
    .with_context(|| {
      format!(
        "invalid config file {}",
        path.display()
      )
    })?;
    cfg.loaded_file =
      Some(path.to_path_buf());
    Ok(cfg)
  }

  /// Applies `ALMANAC_TIMEZONE` and
  /// `ALMANAC_API_URL` from `lookup`.
  pub fn apply_overrides<F>(
    &mut self,
    lookup: F
  ) where
    F: Fn(&str) -> Option<String>
  {
    if let Some(tz) =
      lookup(TIMEZONE_ENV_VAR)
      && !tz.trim().is_empty()
    {
      debug!(timezone = %tz, "timezone override");
      self.time.timezone = Some(tz);
    }
    if let Some(url) =
      lookup(API_URL_ENV_VAR)
      && !url.trim().is_empty()
    {
      debug!(base_url = %url, "api url override");
      self.api.base_url = url;
    }
  }

  /// The configured reference zone, or
  /// the default when unset or invalid.
  #[must_use]
  pub fn reference_timezone(&self) -> Tz {
    self
      .time
      .timezone
      .as_deref()
      .and_then(|raw| {
        parse_timezone(raw, "config")
      })
      .unwrap_or_else(default_timezone)
  }

  #[must_use]
  pub fn keyer(&self) -> DateKeyer {
    DateKeyer::new(
      self.reference_timezone()
    )
  }

  #[must_use]
  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(
      self.api.timeout_secs
    )
  }

  pub fn period_file(
    &self
  ) -> anyhow::Result<PathBuf> {
    if let Some(path) =
      self.state.period_file.as_ref()
    {
      return Ok(expand_tilde(path));
    }
    let base = dirs::data_dir()
      .ok_or_else(|| {
        anyhow!(
          "cannot determine data \
           directory"
        )
      })?;
    Ok(
      base
        .join("almanac")
        .join("period.json")
    )
  }
}

fn sanitize_config(
  config: &mut AlmanacConfig
) {
  if config.grid.fetch_buffer_days < 0
  {
    warn!(
      value = config.grid.fetch_buffer_days,
      "negative fetch buffer; using default"
    );
    config.grid.fetch_buffer_days =
      default_fetch_buffer_days();
  }

  if config.grid.max_bulk_span_days <= 0
  {
    config.grid.max_bulk_span_days =
      default_max_bulk_span_days();
  }

  if config.api.timeout_secs == 0 {
    config.api.timeout_secs =
      default_timeout_secs();
  }

  if config
    .api
    .base_url
    .trim()
    .is_empty()
  {
    config.api.base_url =
      default_base_url();
  }
}

fn resolve_config_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    let path = expand_tilde(path);
    if !path.exists() {
      return Err(anyhow!(
        "config file not found: {}",
        path.display()
      ));
    }
    return Ok(Some(path));
  }

  if let Ok(raw) =
    std::env::var(CONFIG_ENV_VAR)
  {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      let path =
        expand_tilde(Path::new(trimmed));
      if !path.exists() {
        return Err(anyhow!(
          "{CONFIG_ENV_VAR} points at a \
           missing file: {}",
          path.display()
        ));
      }
      return Ok(Some(path));
    }
  }

  if let Ok(dir) = std::env::current_dir()
  {
    let candidate =
      dir.join(CONFIG_FILE_NAME);
    if candidate.exists() {
      return Ok(Some(candidate));
    }
  }

  Ok(
    dirs::config_dir()
      .map(|dir| {
        dir
          .join("almanac")
          .join(CONFIG_FILE_NAME)
      })
      .filter(|path| path.exists())
  )
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

use anyhow::bail;
use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::Deserialize;
use std::path::PathBuf;

/// Env vars holding the backend URL, most specific first.
const URL_VARS: [&str; 2] = ["SUPABASE_URL", "VITE_SUPABASE_URL"];
/// Env vars holding the public API key.
const KEY_VARS: [&str; 2] = ["SUPABASE_ANON_KEY", "VITE_SUPABASE_ANON_KEY"];
const PROXY_VARS: [&str; 4] = ["HTTPS_PROXY", "https_proxy", "HTTP_PROXY", "http_proxy"];

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub refresh: RefreshSettings,
    #[serde(default)]
    pub playback: PlaybackSettings,
    #[serde(default)]
    pub import: ImportSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendSettings {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub anon_key: String,
    #[serde(default)]
    pub proxy: Option<String>,
    /// How often the change feed looks for new rows
    #[serde(default = "default_change_poll_secs")]
    pub change_poll_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            proxy: None,
            change_poll_secs: default_change_poll_secs(),
        }
    }
}

impl BackendSettings {
    /// Fails when the URL or key is missing; nothing can query without them.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut missing = Vec::new();
        if self.url.trim().is_empty() {
            missing.push(URL_VARS[0]);
        }
        if self.anon_key.trim().is_empty() {
            missing.push(KEY_VARS[0]);
        }
        if !missing.is_empty() {
            bail!("backend connection is not configured, set {}", missing.join(" and "));
        }
        Ok(())
    }
}

/// Timer periods must be positive; a zero period cannot drive an interval.
fn require_positive(name: &str, value: u64) -> anyhow::Result<()> {
    if value == 0 {
        bail!("{} must be greater than zero", name);
    }
    Ok(())
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefreshSettings {
    #[serde(default = "default_summary_secs")]
    pub summary_secs: u64,
    #[serde(default = "default_trends_secs")]
    pub trends_secs: u64,
    /// Trailing window of the trend chart; 0 means every row
    #[serde(default = "default_trend_window_hours")]
    pub trend_window_hours: u32,
}

impl RefreshSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        require_positive("refresh.summary_secs", self.summary_secs)?;
        require_positive("refresh.trends_secs", self.trends_secs)
    }
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            summary_secs: default_summary_secs(),
            trends_secs: default_trends_secs(),
            trend_window_hours: default_trend_window_hours(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlaybackSettings {
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
}

impl PlaybackSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        require_positive("playback.tick_millis", self.tick_millis)
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            tick_millis: default_tick_millis(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportSettings {
    #[serde(default = "default_import_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub target_date: Option<String>,
    #[serde(default = "default_counts_batch_size")]
    pub counts_batch_size: usize,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            root: default_import_root(),
            target_date: None,
            counts_batch_size: default_counts_batch_size(),
        }
    }
}

fn default_change_poll_secs() -> u64 {
    5
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_summary_secs() -> u64 {
    30
}

fn default_trends_secs() -> u64 {
    60
}

fn default_trend_window_hours() -> u32 {
    24
}

fn default_tick_millis() -> u64 {
    200
}

fn default_import_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_counts_batch_size() -> usize {
    100
}

/// Load `.env`, then `config/dashboard.*`, then `DASHBOARD__*` variables.
pub fn load_dashboard_config() -> anyhow::Result<DashboardConfig> {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!("Loaded environment from {}", path.display());
    }

    let builder = config::Config::builder()
        .add_source(config::File::with_name("config/dashboard").required(false))
        .add_source(
            config::Environment::with_prefix("DASHBOARD")
                .separator("__")
                .try_parsing(true),
        );

    build_dashboard_config(builder, |name| std::env::var(name).ok())
}

/// Layer the well-known backend and proxy variables over `builder`.
pub fn build_dashboard_config(
    builder: ConfigBuilder<DefaultState>,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<DashboardConfig> {
    let first = |names: &[&str]| names.iter().find_map(|n| env(n).filter(|v| !v.is_empty()));

    let settings = builder
        .set_override_option("backend.url", first(&URL_VARS))?
        .set_override_option("backend.anon_key", first(&KEY_VARS))?
        .build()?;

    let mut config: DashboardConfig = settings.try_deserialize()?;
    if config.backend.proxy.is_none() {
        config.backend.proxy = first(&PROXY_VARS);
    }

    require_positive("backend.change_poll_secs", config.backend.change_poll_secs)?;
    config.refresh.validate()?;
    config.playback.validate()?;
    Ok(config)
}

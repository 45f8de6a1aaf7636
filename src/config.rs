use serde::{Deserialize, Serialize};

/// Gateway configuration. Backend credentials never live here; they arrive
/// per request via `x-bg-*` headers.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Request body limit for JSON endpoints and uploads, in MiB.
    pub max_body_mb: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    pub timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self { max_body_mb: 100 }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 300,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            limits: LimitsConfig::default(),
            upstream: UpstreamConfig::default(),
        }
    }
}

/// Load configuration from an optional TOML file plus `BEDROCK_GATEWAY__*`
/// environment overrides.
pub fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    let mut builder = config::Config::builder();
    match path {
        Some(path) => {
            builder = builder.add_source(config::File::with_name(path));
        }
        None => {
            builder = builder.add_source(config::File::with_name("config").required(false));
        }
    }
    let settings = builder
        .add_source(config::Environment::with_prefix("BEDROCK_GATEWAY").separator("__"))
        .build()?;

    let cfg: Config = settings.try_deserialize()?;
    validate_config(&cfg)?;
    Ok(cfg)
}

fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.server.host.parse::<std::net::IpAddr>().is_err() {
        anyhow::bail!("server.host '{}' is not a valid IP address", cfg.server.host);
    }
    if cfg.limits.max_body_mb == 0 {
        anyhow::bail!("limits.max_body_mb must be nonzero");
    }
    if cfg.upstream.timeout_seconds == 0 {
        anyhow::bail!("upstream.timeout_seconds must be nonzero");
    }
    Ok(())
}

// Hub server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The durable store reads its own pool tuning vars; this
// module covers the core server settings.

use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 3600;
const DEFAULT_REAPER_INTERVAL_SECS: u64 = 300;
const DEFAULT_METRICS_INTERVAL_SECS: u64 = 60;

/// Core hub server configuration.
///
/// Constructed via [`HubConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// JWT signing secret for access tokens.
    pub jwt_secret: String,
    /// PostgreSQL connection string for the durable event log.
    pub database_url: Option<String>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `strata_hub=debug`).
    pub log_filter: String,
    /// Inactivity threshold past which a connection is reaped.
    pub idle_timeout: Duration,
    /// How often the reaper sweeps for idle connections.
    pub reaper_interval: Duration,
    /// How often liveness gauges are published.
    pub metrics_interval: Duration,
}

impl HubConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `STRATA_HUB_HOST` | `0.0.0.0` |
    /// | `STRATA_HUB_PORT` | `8080` |
    /// | `STRATA_HUB_JWT_SECRET` | dev-only placeholder |
    /// | `STRATA_HUB_DATABASE_URL` | *(none: in-memory event log)* |
    /// | `STRATA_HUB_CORS_ORIGINS` | *(none: cors.rs uses dev defaults)* |
    /// | `STRATA_HUB_LOG_FILTER` | `info` |
    /// | `STRATA_HUB_IDLE_TIMEOUT_SECS` | `3600` |
    /// | `STRATA_HUB_REAPER_INTERVAL_SECS` | `300` |
    /// | `STRATA_HUB_METRICS_INTERVAL_SECS` | `60` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("STRATA_HUB_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("STRATA_HUB_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("STRATA_HUB_JWT_SECRET")
            .unwrap_or_else(|_| "strata_local_development_jwt_secret_must_be_32_chars".into());

        let database_url = env("STRATA_HUB_DATABASE_URL").ok();
        let cors_origins = env("STRATA_HUB_CORS_ORIGINS").ok();

        let log_filter = env("STRATA_HUB_LOG_FILTER").unwrap_or_else(|_| "info".into());

        let idle_timeout = duration_from_env(&env, "STRATA_HUB_IDLE_TIMEOUT_SECS", DEFAULT_IDLE_TIMEOUT_SECS);
        let reaper_interval =
            duration_from_env(&env, "STRATA_HUB_REAPER_INTERVAL_SECS", DEFAULT_REAPER_INTERVAL_SECS);
        let metrics_interval =
            duration_from_env(&env, "STRATA_HUB_METRICS_INTERVAL_SECS", DEFAULT_METRICS_INTERVAL_SECS);

        Self {
            listen_addr,
            jwt_secret,
            database_url,
            cors_origins,
            log_filter,
            idle_timeout,
            reaper_interval,
            metrics_interval,
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == "strata_local_development_jwt_secret_must_be_32_chars"
    }
}

fn duration_from_env<F>(env: &F, key: &str, default_secs: u64) -> Duration
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let secs = env(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(default_secs);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| {
            map.get(key)
                .map(|v| v.to_string())
                .ok_or(std::env::VarError::NotPresent)
        }
    }

    #[test]
    fn defaults_when_no_env_vars() {
        let cfg = HubConfig::from_env_fn(env_from_map(HashMap::new()));
        assert_eq!(cfg.listen_addr.port(), 8080);
        assert_eq!(cfg.listen_addr.ip().to_string(), "0.0.0.0");
        assert!(cfg.is_dev_jwt_secret());
        assert!(cfg.database_url.is_none());
        assert!(cfg.cors_origins.is_none());
        assert_eq!(cfg.log_filter, "info");
        assert_eq!(cfg.idle_timeout, Duration::from_secs(3600));
        assert_eq!(cfg.reaper_interval, Duration::from_secs(300));
        assert_eq!(cfg.metrics_interval, Duration::from_secs(60));
    }

    #[test]
    fn custom_host_and_port() {
        let mut m = HashMap::new();
        m.insert("STRATA_HUB_HOST", "127.0.0.1");
        m.insert("STRATA_HUB_PORT", "3000");
        let cfg = HubConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn custom_jwt_secret_is_not_dev() {
        let mut m = HashMap::new();
        m.insert("STRATA_HUB_JWT_SECRET", "production_secret_at_least_32_chars!!");
        let cfg = HubConfig::from_env_fn(env_from_map(m));
        assert!(!cfg.is_dev_jwt_secret());
        assert_eq!(cfg.jwt_secret, "production_secret_at_least_32_chars!!");
    }

    #[test]
    fn database_url_from_env() {
        let mut m = HashMap::new();
        m.insert("STRATA_HUB_DATABASE_URL", "postgres://u:p@host/db");
        let cfg = HubConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://u:p@host/db"));
    }

    #[test]
    fn cors_origins_from_env() {
        let mut m = HashMap::new();
        m.insert("STRATA_HUB_CORS_ORIGINS", "https://app.strata.dev");
        let cfg = HubConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.cors_origins.as_deref(), Some("https://app.strata.dev"));
    }

    #[test]
    fn log_filter_override() {
        let mut m = HashMap::new();
        m.insert("STRATA_HUB_LOG_FILTER", "debug,tower_http=trace");
        let cfg = HubConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.log_filter, "debug,tower_http=trace");
    }

    #[test]
    fn invalid_port_uses_default() {
        let mut m = HashMap::new();
        m.insert("STRATA_HUB_PORT", "not_a_number");
        let cfg = HubConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.port(), 8080);
    }

    #[test]
    fn interval_overrides() {
        let mut m = HashMap::new();
        m.insert("STRATA_HUB_IDLE_TIMEOUT_SECS", "120");
        m.insert("STRATA_HUB_REAPER_INTERVAL_SECS", "15");
        m.insert("STRATA_HUB_METRICS_INTERVAL_SECS", "5");
        let cfg = HubConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.idle_timeout, Duration::from_secs(120));
        assert_eq!(cfg.reaper_interval, Duration::from_secs(15));
        assert_eq!(cfg.metrics_interval, Duration::from_secs(5));
    }

    #[test]
    fn zero_interval_falls_back_to_default() {
        let mut m = HashMap::new();
        m.insert("STRATA_HUB_REAPER_INTERVAL_SECS", "0");
        let cfg = HubConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.reaper_interval, Duration::from_secs(300));
    }
}

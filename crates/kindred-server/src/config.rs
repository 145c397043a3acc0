use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

use kindred_gateway::GatewayConfig;
use kindred_gateway::lifecycle::DEFAULT_MAX_CONTENT_LEN;

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Process configuration, read from `KINDRED_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub gateway: GatewayConfig,
    pub max_content_len: usize,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = std::env::var("KINDRED_JWT_SECRET").unwrap_or_else(|_| {
            warn!("KINDRED_JWT_SECRET not set, using the development secret");
            DEV_JWT_SECRET.into()
        });
        let db_path = std::env::var("KINDRED_DB_PATH").unwrap_or_else(|_| "kindred.db".into());
        let host = std::env::var("KINDRED_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = parse_var("KINDRED_PORT", 3000)?;

        let defaults = GatewayConfig::default();
        let heartbeat_secs: u64 = parse_var("KINDRED_HEARTBEAT_SECS", defaults.heartbeat_interval.as_secs())?;
        let max_missed_heartbeats: u8 =
            parse_var("KINDRED_MAX_MISSED_HEARTBEATS", defaults.max_missed_heartbeats)?;
        let max_content_len: usize = parse_var("KINDRED_MAX_CONTENT_LEN", DEFAULT_MAX_CONTENT_LEN)?;

        if heartbeat_secs == 0 {
            anyhow::bail!("KINDRED_HEARTBEAT_SECS must be positive");
        }
        if max_missed_heartbeats == 0 {
            anyhow::bail!("KINDRED_MAX_MISSED_HEARTBEATS must be positive");
        }

        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        Ok(Self {
            jwt_secret,
            db_path: PathBuf::from(db_path),
            addr,
            gateway: GatewayConfig {
                heartbeat_interval: Duration::from_secs(heartbeat_secs),
                max_missed_heartbeats,
            },
            max_content_len,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse().with_context(|| format!("invalid {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

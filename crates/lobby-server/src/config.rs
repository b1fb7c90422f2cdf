use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub channels: Vec<String>,
    pub command_timeout: Duration,
    pub outbound_queue: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = var("LOBBY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("LOBBY_JWT_SECRET is unset or still a placeholder; it must match the auth service's secret");
        }

        let db_path = var("LOBBY_DB_PATH").unwrap_or_else(|| "lobby.db".into()).into();
        let host = var("LOBBY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = var("LOBBY_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("LOBBY_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .context("LOBBY_HOST/LOBBY_PORT do not form a socket address")?;

        let channels: Vec<String> = var("LOBBY_CHANNELS")
            .unwrap_or_else(|| "general".into())
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect();
        if channels.is_empty() {
            bail!("LOBBY_CHANNELS must name at least one channel");
        }

        let timeout_ms: u64 = var("LOBBY_COMMAND_TIMEOUT_MS")
            .map(|v| v.parse())
            .transpose()
            .context("LOBBY_COMMAND_TIMEOUT_MS must be an integer")?
            .unwrap_or(5000);
        let outbound_queue: usize = var("LOBBY_OUTBOUND_QUEUE")
            .map(|v| v.parse())
            .transpose()
            .context("LOBBY_OUTBOUND_QUEUE must be an integer")?
            .unwrap_or(lobby_gateway::registry::DEFAULT_QUEUE_CAPACITY);

        Ok(Self {
            jwt_secret,
            db_path,
            addr,
            channels,
            command_timeout: Duration::from_millis(timeout_ms),
            outbound_queue,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[("LOBBY_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(config.db_path, PathBuf::from("lobby.db"));
        assert_eq!(config.channels, vec!["general"]);
        assert_eq!(config.command_timeout, Duration::from_secs(5));
        assert_eq!(config.outbound_queue, 256);
    }

    #[test]
    fn placeholder_secret_is_refused() {
        assert!(load(&[]).is_err());
        assert!(load(&[("LOBBY_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn parses_overrides() {
        let config = load(&[
            ("LOBBY_JWT_SECRET", "s3cret"),
            ("LOBBY_PORT", "8080"),
            ("LOBBY_CHANNELS", " channel-1, channel-2 ,,"),
            ("LOBBY_COMMAND_TIMEOUT_MS", "250"),
        ])
        .unwrap();
        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.channels, vec!["channel-1", "channel-2"]);
        assert_eq!(config.command_timeout, Duration::from_millis(250));
    }

    #[test]
    fn bad_numbers_are_errors() {
        assert!(load(&[("LOBBY_JWT_SECRET", "s"), ("LOBBY_PORT", "eighty")]).is_err());
        assert!(load(&[("LOBBY_JWT_SECRET", "s"), ("LOBBY_OUTBOUND_QUEUE", "-1")]).is_err());
    }
}

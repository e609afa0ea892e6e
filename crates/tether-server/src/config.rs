use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

use tether_db::HidePolicy;
use tether_gateway::dispatcher::DEFAULT_QUEUE_CAPACITY;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub hide_policy: HidePolicy,
    pub gateway_queue: usize,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = get("TETHER_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("TETHER_JWT_SECRET is unset or still a placeholder; it must match the identity service's secret");
        }

        let host = get("TETHER_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("TETHER_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("TETHER_PORT must be a port number")?;
        let db_path: PathBuf = get("TETHER_DB_PATH").unwrap_or_else(|| "tether.db".into()).into();

        let hide_policy = match get("TETHER_HIDE_POLICY").as_deref() {
            None | Some("unhide") => HidePolicy::UnhideOnNewMessage,
            Some("stay_hidden") => HidePolicy::StayHidden,
            Some(other) => bail!("TETHER_HIDE_POLICY must be 'unhide' or 'stay_hidden', got '{}'", other),
        };

        let gateway_queue = match get("TETHER_GATEWAY_QUEUE") {
            Some(raw) => raw.parse().context("TETHER_GATEWAY_QUEUE must be a positive integer")?,
            None => DEFAULT_QUEUE_CAPACITY,
        };
        if gateway_queue == 0 {
            bail!("TETHER_GATEWAY_QUEUE must be a positive integer");
        }

        Ok(Self {
            host,
            port,
            db_path,
            jwt_secret,
            hide_policy,
            gateway_queue,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{anyhow, Context};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind: SocketAddr,
    pub db_max_connections: u32,
    pub session_idle_minutes: i64,
    /// A socket that sends nothing for this long is dropped.
    pub socket_idle_seconds: u64,
    pub allowed_origin: Option<String>,
}

impl Config {
    /// Reads `.env` (if present) and the process environment.
    pub fn from_env() -> anyhow::Result<Config> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
        let database_url = get("DATABASE_URL").ok_or(anyhow!("DATABASE_URL is not set"))?;

        Ok(Config {
            database_url,
            bind: parse_or(&get, "MURMUR_BIND", SocketAddr::from(([0, 0, 0, 0], 4000)))?,
            db_max_connections: parse_or(&get, "MURMUR_DB_MAX_CONNECTIONS", 16)?,
            session_idle_minutes: parse_or(&get, "MURMUR_SESSION_IDLE_MINUTES", 60)?,
            socket_idle_seconds: parse_or(&get, "MURMUR_SOCKET_IDLE_SECONDS", 60)?,
            allowed_origin: get("MURMUR_ALLOWED_ORIGIN").filter(|s| !s.is_empty()),
        })
    }

    pub fn socket_idle(&self) -> Duration {
        Duration::from_secs(self.socket_idle_seconds)
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw.parse().with_context(|| format!("{key}={raw:?} is invalid")),
        None => Ok(default),
    }
}

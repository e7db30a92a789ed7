use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, anyhow};

use crate::auth::{DEFAULT_TOKEN_TTL_SECS, MIN_SECRET_LEN};

pub const BIND_VAR: &str = "GRAPHBOARD_BIND";
pub const DATA_DIR_VAR: &str = "GRAPHBOARD_DATA_DIR";
pub const STATIC_DIR_VAR: &str = "GRAPHBOARD_STATIC_DIR";
pub const NO_STATIC_VAR: &str = "GRAPHBOARD_NO_STATIC";
pub const JWT_SECRET_VAR: &str = "GRAPHBOARD_JWT_SECRET";
pub const TOKEN_TTL_VAR: &str = "GRAPHBOARD_TOKEN_TTL_SECS";

const DEFAULT_BIND: &str = "127.0.0.1:3000";
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_STATIC_DIR: &str = "./client/dist";

#[derive(Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    /// Directory holding the built front-end; `None` disables the fallback.
    pub static_dir: Option<PathBuf>,
    pub jwt_secret: String,
    pub token_ttl_secs: i64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("data_dir", &self.data_dir)
            .field("static_dir", &self.static_dir)
            .field("jwt_secret", &"[REDACTED]")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}

impl Config {
    /// Reads configuration from the process environment, after loading a `.env`
    /// file from the working directory when one exists.
    pub fn from_env() -> anyhow::Result<Self> {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                return Err(anyhow::Error::new(err).context("failed to load .env file"));
            }
        }
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind = lookup(BIND_VAR).unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr: SocketAddr = bind
            .parse()
            .with_context(|| format!("invalid {} '{}'", BIND_VAR, bind))?;

        let data_dir = lookup(DATA_DIR_VAR)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());

        let static_dir = if flag(lookup(NO_STATIC_VAR)) {
            None
        } else {
            Some(PathBuf::from(
                lookup(STATIC_DIR_VAR)
                    .filter(|value| !value.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_STATIC_DIR.to_string()),
            ))
        };

        let jwt_secret = lookup(JWT_SECRET_VAR)
            .with_context(|| format!("{} is required to sign tokens", JWT_SECRET_VAR))?;
        if jwt_secret.len() < MIN_SECRET_LEN {
            return Err(anyhow!(
                "{} must be at least {} bytes",
                JWT_SECRET_VAR,
                MIN_SECRET_LEN
            ));
        }

        let token_ttl_secs = match lookup(TOKEN_TTL_VAR) {
            Some(raw) => {
                let ttl: i64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid {} '{}'", TOKEN_TTL_VAR, raw))?;
                if ttl <= 0 {
                    return Err(anyhow!("{} must be positive", TOKEN_TTL_VAR));
                }
                ttl
            }
            None => DEFAULT_TOKEN_TTL_SECS,
        };

        Ok(Self {
            bind_addr,
            data_dir: PathBuf::from(data_dir),
            static_dir,
            jwt_secret,
            token_ttl_secs,
        })
    }

    pub fn users_path(&self) -> PathBuf {
        self.data_dir.join("users.json")
    }

    pub fn graphs_path(&self) -> PathBuf {
        self.data_dir.join("graphs.json")
    }
}

fn flag(value: Option<String>) -> bool {
    match value {
        Some(value) => {
            let normalized = value.trim().to_ascii_lowercase();
            normalized == "1" || normalized == "true" || normalized == "yes"
        }
        None => false,
    }
}

use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::Context;

use crate::core::approximate_count::{
    ApproximateCountOptions, DEFAULT_MAX_STALENESS_SECS, DEFAULT_THRESHOLD,
};
use crate::core::pagination::{PaginationOptions, DEFAULT_FALLBACK_PAGES};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub max_connections: u32,
    pub approx_count_threshold: u64,
    pub approx_count_max_staleness_secs: u64,
    pub log_level: String,
}

impl AppConfig {
    /// 从环境变量读取配置 (先加载 .env)
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;
        Ok(Self {
            database_url,
            bind_addr: parse_or(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 5)?,
            approx_count_threshold: parse_or(&lookup, "APPROX_COUNT_THRESHOLD", DEFAULT_THRESHOLD)?,
            approx_count_max_staleness_secs: parse_or(
                &lookup,
                "APPROX_COUNT_MAX_STALENESS_SECS",
                DEFAULT_MAX_STALENESS_SECS,
            )?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn pagination_options(&self) -> PaginationOptions {
        PaginationOptions {
            approximate: ApproximateCountOptions {
                threshold: self.approx_count_threshold,
                max_staleness_secs: self.approx_count_max_staleness_secs,
            },
            fallback_pages: DEFAULT_FALLBACK_PAGES,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}={:?}: {}", key, raw, e)),
        None => Ok(default),
    }
}

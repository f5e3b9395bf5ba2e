use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::{env, fmt};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
	pub redis: RedisConfig,
	pub bind_address: SocketAddr,
	pub paths: ConfPaths,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
	pub server: String,
	pub port: u16,
}

/// Locations of the three documents the proxy watches.
#[derive(Debug, Clone)]
pub struct ConfPaths {
	pub lds: PathBuf,
	pub cds: PathBuf,
	pub eds: PathBuf,
}

pub fn from_env() -> anyhow::Result<Config> {
	Ok(Config {
		redis: RedisConfig {
			server: parse("REDIS_SERVER")?.unwrap_or_else(|| "127.0.0.1".to_string()),
			port: parse("REDIS_PORT")?.unwrap_or(6379),
		},
		bind_address: parse("BIND_ADDRESS")?.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8888))),
		paths: ConfPaths {
			lds: parse("LDS_CONF_PATH")?.unwrap_or_else(|| PathBuf::from("/etc/envoy/lds.json")),
			cds: parse("CDS_CONF_PATH")?.unwrap_or_else(|| PathBuf::from("/etc/envoy/cds.json")),
			eds: parse("EDS_CONF_PATH")?.unwrap_or_else(|| PathBuf::from("/etc/envoy/eds.json")),
		},
	})
}

fn parse<T: FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
	T::Err: fmt::Display + fmt::Debug + Send + Sync + 'static,
{
	match env::var(name) {
		Ok(value) if value.is_empty() => Ok(None),
		Ok(value) => value
			.parse::<T>()
			.map(Some)
			.map_err(|e| anyhow::anyhow!("{e}"))
			.with_context(|| format!("invalid value for {name}")),
		Err(_) => Ok(None),
	}
}

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamReadOptions, StreamReadReply};
use thiserror::Error;
use tracing::debug;

use crate::config::RedisConfig;
use crate::types::request::ConfigRequest;
use crate::types::{Eds, Lds, ProxyConfig};

const STREAM_KEY: &str = "request_stream";
const REQUEST_FIELD: &str = "request";
const SNAPSHOT_KEY: &str = "envoy_conf";

/// Content-addressed id of an `(listener port, URL prefix)` pair. Doubles as
/// the cluster name in CDS/EDS.
pub fn endpoint_uuid(lb_port: &str, url_prefix: &str) -> String {
	format!("{:x}", md5::compute(format!("{lb_port}{url_prefix}\n")))
}

/// Content-addressed id of an `(address, port)` backend.
pub fn server_uuid(address: &str, port: u16) -> String {
	format!("{:x}", md5::compute(format!("{address}{port}\n")))
}

/// Positions of every route in the LDS, keyed by endpoint uuid. This is the
/// full content of the EP-index after a rebuild.
pub fn endpoint_entries(lds: &Lds) -> Vec<(String, (usize, usize))> {
	lds
		.resources
		.iter()
		.enumerate()
		.flat_map(|(resource_idx, resource)| {
			resource.routes.iter().enumerate().map(move |(route_idx, route)| {
				(
					endpoint_uuid(&resource.port_value, &route.prefix),
					(resource_idx, route_idx),
				)
			})
		})
		.collect()
}

/// Positions of every lb-endpoint in the EDS, keyed by server uuid. This is
/// the full content of the SV-index after a rebuild.
pub fn server_entries(eds: &Eds) -> Vec<(String, (usize, usize))> {
	eds
		.resources
		.iter()
		.enumerate()
		.flat_map(|(resource_idx, resource)| {
			resource
				.lb_endpoints
				.iter()
				.enumerate()
				.map(move |(endpoint_idx, endpoint)| {
					(
						server_uuid(&endpoint.address, endpoint.port_value),
						(resource_idx, endpoint_idx),
					)
				})
		})
		.collect()
}

fn encode_index_entry(resource_idx: usize, child_idx: usize) -> String {
	format!("{resource_idx}_{child_idx}")
}

fn parse_index_entry(raw: &str) -> Result<(usize, usize), StoreError> {
	let malformed = || StoreError::MalformedIndexEntry(raw.to_string());
	let (resource, child) = raw.split_once('_').ok_or_else(malformed)?;
	Ok((
		resource.parse().map_err(|_| malformed())?,
		child.parse().map_err(|_| malformed())?,
	))
}

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("redis request failed: {0}")]
	Redis(#[from] redis::RedisError),
	#[error("decoding stored value failed: {0}")]
	Decode(#[from] serde_json::Error),
	#[error("config snapshot is missing")]
	MissingSnapshot,
	#[error("malformed index entry '{0}'")]
	MalformedIndexEntry(String),
	#[error("queue entry is missing the '{REQUEST_FIELD}' field")]
	MalformedQueueEntry,
}

/// The external-store contract: a FIFO request queue, the config snapshot,
/// and the two uuid indexes. The API enqueues and reads; the worker is the
/// only writer of snapshot and indexes.
#[async_trait]
pub trait Repository: Send + Sync {
	async fn enqueue(&self, request: &ConfigRequest) -> Result<(), StoreError>;

	/// Take the oldest queued request, blocking until one exists. The entry
	/// is deleted once dequeued.
	async fn pop_queue(&self) -> Result<ConfigRequest, StoreError>;

	async fn save_snapshot(&self, conf: &ProxyConfig) -> Result<(), StoreError>;
	async fn load_snapshot(&self) -> Result<ProxyConfig, StoreError>;

	async fn endpoint_index(&self, endpoint_uuid: &str)
	-> Result<Option<(usize, usize)>, StoreError>;
	async fn server_index(&self, server_uuid: &str) -> Result<Option<(usize, usize)>, StoreError>;

	/// Flush and repopulate the EP-index from the given config.
	async fn rebuild_endpoint_index(&self, conf: &ProxyConfig) -> Result<(), StoreError>;
	/// Flush and repopulate the SV-index from the given config.
	async fn rebuild_server_index(&self, conf: &ProxyConfig) -> Result<(), StoreError>;

	async fn flush_all(&self) -> Result<(), StoreError>;
}

/// Redis-backed repository. The four namespaces live in DB 0..3 of one
/// server: the queue is a stream in DB 0, the snapshot a single key in DB 1,
/// the EP- and SV-indexes plain keyspaces in DB 2 and 3.
pub struct RedisRepository {
	queue: MultiplexedConnection,
	snapshot: MultiplexedConnection,
	endpoint_idx: MultiplexedConnection,
	server_idx: MultiplexedConnection,
}

impl RedisRepository {
	pub async fn connect(cfg: &RedisConfig) -> Result<Self, StoreError> {
		Ok(RedisRepository {
			queue: Self::open(cfg, 0).await?,
			snapshot: Self::open(cfg, 1).await?,
			endpoint_idx: Self::open(cfg, 2).await?,
			server_idx: Self::open(cfg, 3).await?,
		})
	}

	async fn open(cfg: &RedisConfig, db: u8) -> Result<MultiplexedConnection, StoreError> {
		let client = redis::Client::open(format!("redis://{}:{}/{db}", cfg.server, cfg.port))?;
		Ok(client.get_multiplexed_async_connection().await?)
	}

	async fn rebuild(
		conn: &MultiplexedConnection,
		entries: Vec<(String, (usize, usize))>,
	) -> Result<(), StoreError> {
		let mut conn = conn.clone();
		let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
		for (uuid, (resource_idx, child_idx)) in entries {
			let _: () = conn
				.set(uuid, encode_index_entry(resource_idx, child_idx))
				.await?;
		}
		Ok(())
	}

	async fn lookup(
		conn: &MultiplexedConnection,
		uuid: &str,
	) -> Result<Option<(usize, usize)>, StoreError> {
		let mut conn = conn.clone();
		let raw: Option<String> = conn.get(uuid).await?;
		raw.as_deref().map(parse_index_entry).transpose()
	}
}

#[async_trait]
impl Repository for RedisRepository {
	async fn enqueue(&self, request: &ConfigRequest) -> Result<(), StoreError> {
		let payload = serde_json::to_string(request)?;
		let mut conn = self.queue.clone();
		let _: () = conn
			.xadd(STREAM_KEY, "*", &[(REQUEST_FIELD, payload.as_str())])
			.await?;
		Ok(())
	}

	async fn pop_queue(&self) -> Result<ConfigRequest, StoreError> {
		let mut conn = self.queue.clone();
		let options = StreamReadOptions::default().block(0);
		loop {
			let reply: StreamReadReply = conn
				.xread_options(&[STREAM_KEY], &["0"], &options)
				.await?;
			let Some(entry) = reply.keys.into_iter().flat_map(|key| key.ids).next() else {
				continue;
			};
			let _: () = conn.xdel(STREAM_KEY, &[entry.id.as_str()]).await?;
			let raw: String = entry
				.get(REQUEST_FIELD)
				.ok_or(StoreError::MalformedQueueEntry)?;
			debug!(entry = %raw, "dequeued request");
			return Ok(serde_json::from_str(&raw)?);
		}
	}

	async fn save_snapshot(&self, conf: &ProxyConfig) -> Result<(), StoreError> {
		let encoded = serde_json::to_string(conf)?;
		let mut conn = self.snapshot.clone();
		let _: () = conn.set(SNAPSHOT_KEY, encoded).await?;
		Ok(())
	}

	async fn load_snapshot(&self) -> Result<ProxyConfig, StoreError> {
		let mut conn = self.snapshot.clone();
		let raw: Option<String> = conn.get(SNAPSHOT_KEY).await?;
		let raw = raw.ok_or(StoreError::MissingSnapshot)?;
		Ok(serde_json::from_str(&raw)?)
	}

	async fn endpoint_index(
		&self,
		endpoint_uuid: &str,
	) -> Result<Option<(usize, usize)>, StoreError> {
		Self::lookup(&self.endpoint_idx, endpoint_uuid).await
	}

	async fn server_index(&self, server_uuid: &str) -> Result<Option<(usize, usize)>, StoreError> {
		Self::lookup(&self.server_idx, server_uuid).await
	}

	async fn rebuild_endpoint_index(&self, conf: &ProxyConfig) -> Result<(), StoreError> {
		Self::rebuild(&self.endpoint_idx, endpoint_entries(&conf.lds)).await
	}

	async fn rebuild_server_index(&self, conf: &ProxyConfig) -> Result<(), StoreError> {
		Self::rebuild(&self.server_idx, server_entries(&conf.eds)).await
	}

	async fn flush_all(&self) -> Result<(), StoreError> {
		for conn in [
			&self.queue,
			&self.snapshot,
			&self.endpoint_idx,
			&self.server_idx,
		] {
			let mut conn = conn.clone();
			let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
		}
		Ok(())
	}
}

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{Repository, StoreError, endpoint_entries, server_entries};
use crate::types::ProxyConfig;
use crate::types::request::ConfigRequest;

/// In-memory repository with the same observable behaviour as the Redis
/// one, used to drive the API and worker in tests.
#[derive(Default)]
pub struct MemoryRepository {
	state: Mutex<State>,
	queued: Notify,
}

#[derive(Default)]
struct State {
	queue: VecDeque<ConfigRequest>,
	snapshot: Option<String>,
	endpoint_idx: HashMap<String, (usize, usize)>,
	server_idx: HashMap<String, (usize, usize)>,
}

impl MemoryRepository {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn queue_len(&self) -> usize {
		self.state.lock().unwrap().queue.len()
	}
}

#[async_trait]
impl Repository for MemoryRepository {
	async fn enqueue(&self, request: &ConfigRequest) -> Result<(), StoreError> {
		self
			.state
			.lock()
			.unwrap()
			.queue
			.push_back(request.clone());
		self.queued.notify_one();
		Ok(())
	}

	async fn pop_queue(&self) -> Result<ConfigRequest, StoreError> {
		loop {
			if let Some(request) = self.state.lock().unwrap().queue.pop_front() {
				return Ok(request);
			}
			self.queued.notified().await;
		}
	}

	async fn save_snapshot(&self, conf: &ProxyConfig) -> Result<(), StoreError> {
		let encoded = serde_json::to_string(conf)?;
		self.state.lock().unwrap().snapshot = Some(encoded);
		Ok(())
	}

	async fn load_snapshot(&self) -> Result<ProxyConfig, StoreError> {
		let raw = self
			.state
			.lock()
			.unwrap()
			.snapshot
			.clone()
			.ok_or(StoreError::MissingSnapshot)?;
		Ok(serde_json::from_str(&raw)?)
	}

	async fn endpoint_index(
		&self,
		endpoint_uuid: &str,
	) -> Result<Option<(usize, usize)>, StoreError> {
		Ok(
			self
				.state
				.lock()
				.unwrap()
				.endpoint_idx
				.get(endpoint_uuid)
				.copied(),
		)
	}

	async fn server_index(&self, server_uuid: &str) -> Result<Option<(usize, usize)>, StoreError> {
		Ok(
			self
				.state
				.lock()
				.unwrap()
				.server_idx
				.get(server_uuid)
				.copied(),
		)
	}

	async fn rebuild_endpoint_index(&self, conf: &ProxyConfig) -> Result<(), StoreError> {
		let entries = endpoint_entries(&conf.lds).into_iter().collect();
		self.state.lock().unwrap().endpoint_idx = entries;
		Ok(())
	}

	async fn rebuild_server_index(&self, conf: &ProxyConfig) -> Result<(), StoreError> {
		let entries = server_entries(&conf.eds).into_iter().collect();
		self.state.lock().unwrap().server_idx = entries;
		Ok(())
	}

	async fn flush_all(&self) -> Result<(), StoreError> {
		*self.state.lock().unwrap() = State::default();
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::request::Mode;

	#[tokio::test]
	async fn queue_is_fifo() {
		let repo = MemoryRepository::new();
		let uuid = "f".repeat(32);
		for prefix in ["/a", "/b", "/c"] {
			let req =
				ConfigRequest::endpoint(Mode::Add, "18080", prefix, "www.example.com", &uuid)
					.unwrap();
			repo.enqueue(&req).await.unwrap();
		}
		for prefix in ["/a", "/b", "/c"] {
			let got = repo.pop_queue().await.unwrap();
			match got.payload {
				crate::types::request::Payload::Endpoints(spec) => {
					assert_eq!(spec.route.prefix, prefix)
				},
				other => panic!("unexpected payload: {other:?}"),
			}
		}
		assert_eq!(repo.queue_len(), 0);
	}

	#[tokio::test]
	async fn snapshot_round_trips() {
		let repo = MemoryRepository::new();
		assert!(matches!(
			repo.load_snapshot().await,
			Err(StoreError::MissingSnapshot)
		));
		let conf = ProxyConfig::default();
		repo.save_snapshot(&conf).await.unwrap();
		assert_eq!(repo.load_snapshot().await.unwrap(), conf);
	}
}

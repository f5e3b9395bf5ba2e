use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfPaths};
use crate::files;
use crate::store::{Repository, StoreError};
use crate::types::ProxyConfig;
use crate::types::request::{ConfigRequest, Mode};

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Apply one request to the authoritative configuration. A mutation tree is
/// built from a copy of the current config, then merged in (add) or
/// subtracted (remove). Returns whether anything changed.
pub fn apply(conf: &mut ProxyConfig, request: &ConfigRequest) -> bool {
	let mut mutation = conf.clone();
	match request.mode {
		Mode::Add => {
			mutation.apply_request(request);
			conf.add(&mutation)
		},
		Mode::Remove => {
			mutation.remove_without_request(request);
			conf.remove(&mutation)
		},
	}
}

#[derive(Debug, Error)]
enum PublishError {
	#[error(transparent)]
	Store(#[from] StoreError),
	#[error(transparent)]
	Write(#[from] files::WriteError),
}

/// Push the post-apply state out, in the fixed order readers rely on:
/// EP-index, SV-index, snapshot, then the three files.
async fn publish(
	repo: &dyn Repository,
	conf: &ProxyConfig,
	paths: &ConfPaths,
) -> Result<(), PublishError> {
	repo.rebuild_endpoint_index(conf).await?;
	repo.rebuild_server_index(conf).await?;
	repo.save_snapshot(conf).await?;
	files::write(paths, conf)?;
	Ok(())
}

/// The single queue consumer. Owns the authoritative in-memory config;
/// nothing else ever mutates it.
pub async fn run(config: Arc<Config>, repo: impl Repository) -> anyhow::Result<()> {
	let mut conf = files::load(&config.paths).context("load config documents")?;

	repo.flush_all().await.context("flush store")?;
	repo
		.save_snapshot(&conf)
		.await
		.context("store initial snapshot")?;
	repo
		.rebuild_endpoint_index(&conf)
		.await
		.context("build endpoint index")?;
	repo
		.rebuild_server_index(&conf)
		.await
		.context("build server index")?;
	info!(
		lds_version = conf.lds.version_info,
		cds_version = conf.cds.version_info,
		eds_version = conf.eds.version_info,
		"worker started"
	);

	loop {
		let request = match repo.pop_queue().await {
			Ok(request) => request,
			Err(e) => {
				warn!(error = %e, "reading the request queue failed");
				tokio::time::sleep(RETRY_DELAY).await;
				continue;
			},
		};
		debug!(request = ?request, "dequeued request");

		if !apply(&mut conf, &request) {
			debug!("request produced no change");
			continue;
		}

		// The config changed; retry the publish until it lands. Re-running
		// it is idempotent, and a file-level failure is fatal.
		loop {
			match publish(&repo, &conf, &config.paths).await {
				Ok(()) => {
					info!(
						lds_version = conf.lds.version_info,
						cds_version = conf.cds.version_info,
						eds_version = conf.eds.version_info,
						"configuration updated"
					);
					break;
				},
				Err(PublishError::Store(e)) => {
					warn!(error = %e, "publishing to the store failed, retrying");
					tokio::time::sleep(RETRY_DELAY).await;
				},
				Err(PublishError::Write(e)) => {
					return Err(e).context("write config files");
				},
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::{endpoint_uuid, server_uuid};
	use crate::types::request::Payload;

	fn add_endpoint(conf: &mut ProxyConfig, port: &str, prefix: &str, host: &str) -> String {
		let uuid = endpoint_uuid(port, prefix);
		let request = ConfigRequest::endpoint(Mode::Add, port, prefix, host, &uuid).unwrap();
		assert!(apply(conf, &request));
		uuid
	}

	fn add_server(conf: &mut ProxyConfig, uuid: &str, address: &str, port: u16) {
		let request = ConfigRequest::server(Mode::Add, address, port, uuid).unwrap();
		assert!(apply(conf, &request));
	}

	#[test]
	fn endpoint_add_touches_lds_and_cds_only() {
		let mut conf = ProxyConfig::default();
		let uuid = add_endpoint(&mut conf, "18080", "/", "www.example.com");

		assert_eq!(conf.lds.version_info, 1);
		assert_eq!(conf.cds.version_info, 1);
		assert_eq!(conf.eds.version_info, 0);
		assert_eq!(conf.lds.resources[0].routes[0].cluster_name, uuid);
		assert_eq!(conf.cds.resources[0].name, uuid);
		assert!(conf.eds.resources.is_empty());
	}

	#[test]
	fn identical_add_applied_twice_changes_nothing() {
		let mut conf = ProxyConfig::default();
		let uuid = endpoint_uuid("18080", "/");
		let request =
			ConfigRequest::endpoint(Mode::Add, "18080", "/", "www.example.com", &uuid).unwrap();

		assert!(apply(&mut conf, &request));
		let first = conf.clone();
		assert!(!apply(&mut conf, &request));
		assert_eq!(conf, first);
		assert_eq!(conf.lds.version_info, 1);
	}

	#[test]
	fn server_add_touches_eds_only() {
		let mut conf = ProxyConfig::default();
		let uuid = add_endpoint(&mut conf, "18080", "/", "www.example.com");
		add_server(&mut conf, &uuid, "10.0.0.1", 80);

		assert_eq!(conf.lds.version_info, 1);
		assert_eq!(conf.cds.version_info, 1);
		assert_eq!(conf.eds.version_info, 1);
		assert_eq!(conf.eds.resources[0].cluster_name, uuid);
		assert_eq!(conf.eds.resources[0].lb_endpoints.len(), 1);

		// A duplicate backend registration is a no-op.
		let request = ConfigRequest::server(Mode::Add, "10.0.0.1", 80, &uuid).unwrap();
		assert!(!apply(&mut conf, &request));
		assert_eq!(conf.eds.version_info, 1);
	}

	#[test]
	fn server_remove_collapses_the_load_assignment() {
		let mut conf = ProxyConfig::default();
		let uuid = add_endpoint(&mut conf, "18080", "/", "www.example.com");
		add_server(&mut conf, &uuid, "10.0.0.1", 80);

		let request = ConfigRequest::server(Mode::Remove, "10.0.0.1", 80, &uuid).unwrap();
		assert!(apply(&mut conf, &request));

		// The only backend is gone, so the whole resource is gone; the
		// listener and cluster stay.
		assert!(conf.eds.resources.is_empty());
		assert_eq!(conf.eds.version_info, 2);
		assert_eq!(conf.lds.version_info, 1);
		assert_eq!(conf.cds.version_info, 1);
	}

	#[test]
	fn endpoint_remove_clears_backends_too() {
		let mut conf = ProxyConfig::default();
		let uuid = add_endpoint(&mut conf, "18080", "/", "www.example.com");
		add_server(&mut conf, &uuid, "10.0.0.1", 80);

		let request =
			ConfigRequest::endpoint(Mode::Remove, "18080", "/", "www.example.com", &uuid).unwrap();
		assert!(apply(&mut conf, &request));

		assert!(conf.lds.resources.is_empty());
		assert!(conf.cds.resources.is_empty());
		assert!(conf.eds.resources.is_empty());
		assert_eq!(conf.lds.version_info, 2);
		assert_eq!(conf.cds.version_info, 2);
		assert_eq!(conf.eds.version_info, 2);
	}

	#[test]
	fn endpoint_remove_without_backends_leaves_eds_version_alone() {
		let mut conf = ProxyConfig::default();
		let uuid = add_endpoint(&mut conf, "18080", "/", "www.example.com");

		let request =
			ConfigRequest::endpoint(Mode::Remove, "18080", "/", "www.example.com", &uuid).unwrap();
		assert!(apply(&mut conf, &request));
		assert_eq!(conf.eds.version_info, 0);
	}

	#[test]
	fn remove_of_unknown_entities_changes_nothing() {
		let mut conf = ProxyConfig::default();
		add_endpoint(&mut conf, "18080", "/", "www.example.com");
		let before = conf.clone();

		let other = endpoint_uuid("19090", "/nope");
		let request =
			ConfigRequest::endpoint(Mode::Remove, "19090", "/nope", "x.example.com", &other)
				.unwrap();
		assert!(!apply(&mut conf, &request));
		assert_eq!(conf, before);
	}

	#[test]
	fn removing_one_endpoint_keeps_its_listener_siblings() {
		let mut conf = ProxyConfig::default();
		let first = add_endpoint(&mut conf, "18080", "/", "www.example.com");
		let second = add_endpoint(&mut conf, "18080", "/api", "api.example.com");
		add_server(&mut conf, &second, "10.0.0.2", 80);

		let request =
			ConfigRequest::endpoint(Mode::Remove, "18080", "/", "www.example.com", &first)
				.unwrap();
		assert!(apply(&mut conf, &request));

		assert_eq!(conf.lds.resources.len(), 1);
		assert_eq!(conf.lds.resources[0].routes.len(), 1);
		assert_eq!(conf.lds.resources[0].routes[0].cluster_name, second);
		assert_eq!(conf.cds.resources.len(), 1);
		// The surviving endpoint keeps its backends.
		assert_eq!(conf.eds.resources.len(), 1);
		assert_eq!(
			conf.eds.resources[0].lb_endpoints[0].address,
			"10.0.0.2"
		);
	}

	#[test]
	fn queued_requests_apply_in_fifo_order() {
		let mut conf = ProxyConfig::default();
		let uuid = endpoint_uuid("18080", "/");
		let requests = vec![
			ConfigRequest::endpoint(Mode::Add, "18080", "/", "www.example.com", &uuid).unwrap(),
			ConfigRequest::server(Mode::Add, "10.0.0.1", 80, &uuid).unwrap(),
			ConfigRequest::server(Mode::Remove, "10.0.0.1", 80, &uuid).unwrap(),
		];
		for request in &requests {
			apply(&mut conf, request);
		}
		// Add, add, remove in order: the backend is gone again at the end.
		assert!(conf.eds.resources.is_empty());
		assert_eq!(conf.eds.version_info, 2);

		// Applied out of order, the remove would be a no-op first and the
		// backend would survive.
		let mut out_of_order = ProxyConfig::default();
		apply(&mut out_of_order, &requests[0]);
		apply(&mut out_of_order, &requests[2]);
		apply(&mut out_of_order, &requests[1]);
		assert_eq!(out_of_order.eds.resources.len(), 1);
	}

	#[test]
	fn index_consistency_after_apply() {
		use crate::store::{endpoint_entries, server_entries};

		let mut conf = ProxyConfig::default();
		let uuid1 = add_endpoint(&mut conf, "18080", "/", "www.example.com");
		let uuid2 = add_endpoint(&mut conf, "18080", "/api", "api.example.com");
		add_server(&mut conf, &uuid1, "10.0.0.1", 80);
		add_server(&mut conf, &uuid2, "10.0.0.2", 8080);

		for (uuid, (r, t)) in endpoint_entries(&conf.lds) {
			let listener = &conf.lds.resources[r];
			assert_eq!(
				uuid,
				endpoint_uuid(&listener.port_value, &listener.routes[t].prefix)
			);
		}
		for (uuid, (r, e)) in server_entries(&conf.eds) {
			let backend = &conf.eds.resources[r].lb_endpoints[e];
			assert_eq!(uuid, server_uuid(&backend.address, backend.port_value));
		}

		// Every route points at a cluster that exists after an add.
		assert!(conf.lds.resources.iter().all(|listener| {
			listener.routes.iter().all(|route| {
				conf
					.cds
					.resources
					.iter()
					.any(|cluster| cluster.name == route.cluster_name)
			})
		}));
	}

	#[test]
	fn payload_shape_survives_the_queue() {
		let uuid = endpoint_uuid("18080", "/");
		let request = ConfigRequest::server(Mode::Add, "10.0.0.1", 80, &uuid).unwrap();
		let encoded = serde_json::to_string(&request).unwrap();
		let decoded: ConfigRequest = serde_json::from_str(&encoded).unwrap();
		match &decoded.payload {
			Payload::Servers(spec) => {
				assert_eq!(spec.address, "10.0.0.1");
				assert_eq!(spec.port, 80);
			},
			other => panic!("unexpected payload: {other:?}"),
		}
		assert_eq!(decoded, request);
	}
}

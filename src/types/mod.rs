pub mod cds;
pub mod eds;
pub mod lds;
pub mod request;

use serde::{Deserialize, Serialize};

pub use cds::Cds;
pub use eds::Eds;
pub use lds::Lds;

use crate::types::request::{ConfigRequest, Payload};

/// The full proxy configuration: the three discovery documents, serialized
/// together as the snapshot stored under `envoy_conf`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
	pub lds: Lds,
	pub cds: Cds,
	pub eds: Eds,
}

impl ProxyConfig {
	/// Turn this tree into the mutation tree for an add: the documents the
	/// payload targets are replaced by single-resource trees built from the
	/// request, the rest keep their current content (merging an unchanged
	/// copy back in is a no-op).
	pub fn apply_request(&mut self, request: &ConfigRequest) {
		match &request.payload {
			Payload::Endpoints(spec) => {
				self.lds.apply_request(spec, &request.endpoint_uuid);
				self.cds.apply_request(&request.endpoint_uuid);
			},
			Payload::Servers(spec) => {
				self.eds.apply_request(spec, &request.endpoint_uuid);
			},
		}
	}

	/// Turn this tree into the mutation tree for a remove by projecting the
	/// current content through the request keys, so that the subtraction
	/// deletes exactly the identified entities.
	///
	/// Removing an endpoint projects its route, its cluster, and its whole
	/// load assignment (backends included, so they are cleared with it).
	/// Removing a server keeps the listener and cluster untouched and
	/// projects the single matching backend.
	pub fn remove_without_request(&mut self, request: &ConfigRequest) {
		match &request.payload {
			Payload::Endpoints(_) => {
				self.lds.remove_without_request(&request.endpoint_uuid);
				self.cds.remove_without_request(&request.endpoint_uuid);
				self.eds.retain_cluster(&request.endpoint_uuid);
			},
			Payload::Servers(spec) => {
				self.lds.set_empty();
				self.cds.set_empty();
				self.eds.remove_without_request(spec, &request.endpoint_uuid);
			},
		}
	}

	/// Merge a mutation tree into this configuration. Each document bumps
	/// its own version when it changed.
	pub fn add(&mut self, other: &ProxyConfig) -> bool {
		let lds_changed = self.lds.add(&other.lds);
		let cds_changed = self.cds.add(&other.cds);
		let eds_changed = self.eds.add(&other.eds);
		lds_changed || cds_changed || eds_changed
	}

	/// Subtract a mutation tree from this configuration.
	pub fn remove(&mut self, other: &ProxyConfig) -> bool {
		let lds_changed = self.lds.remove(&other.lds);
		let cds_changed = self.cds.remove(&other.cds);
		let eds_changed = self.eds.remove(&other.eds);
		lds_changed || cds_changed || eds_changed
	}
}

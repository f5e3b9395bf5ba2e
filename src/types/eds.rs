use serde::{Deserialize, Serialize};

use crate::types::request::ServerSpec;

/// Endpoint Discovery document: one load assignment per cluster, one
/// lb-endpoint per backend server.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Eds {
	#[serde(with = "crate::serdes::version_string")]
	pub version_info: u64,
	pub resources: Vec<LoadAssignment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "wire::LoadAssignment", into = "wire::LoadAssignment")]
pub struct LoadAssignment {
	pub cluster_name: String,
	pub lb_endpoints: Vec<LbEndpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "wire::LbEndpoint", into = "wire::LbEndpoint")]
pub struct LbEndpoint {
	pub address: String,
	pub port_value: u16,
}

impl LoadAssignment {
	pub fn new(cluster_name: &str, endpoint: LbEndpoint) -> Self {
		LoadAssignment {
			cluster_name: cluster_name.to_string(),
			lb_endpoints: vec![endpoint],
		}
	}
}

impl LbEndpoint {
	pub fn new(address: &str, port_value: u16) -> Self {
		LbEndpoint {
			address: address.to_string(),
			port_value,
		}
	}

	fn same_backend(&self, other: &LbEndpoint) -> bool {
		self.address == other.address && self.port_value == other.port_value
	}
}

impl Eds {
	pub fn apply_request(&mut self, spec: &ServerSpec, endpoint_uuid: &str) {
		self.resources = vec![LoadAssignment::new(
			endpoint_uuid,
			LbEndpoint::new(&spec.address, spec.port),
		)];
	}

	/// Merge `other` into self. Resources are keyed by cluster name,
	/// lb-endpoints within a resource by `(address, port)`; a backend
	/// already present is left alone.
	pub fn add(&mut self, other: &Eds) -> bool {
		let mut changed = false;
		for new_resource in &other.resources {
			let Some(idx) = self
				.resources
				.iter()
				.position(|r| r.cluster_name == new_resource.cluster_name)
			else {
				self.resources.push(new_resource.clone());
				changed = true;
				continue;
			};
			let current = &mut self.resources[idx];
			for endpoint in &new_resource.lb_endpoints {
				if !current.lb_endpoints.iter().any(|e| e.same_backend(endpoint)) {
					current.lb_endpoints.push(endpoint.clone());
					changed = true;
				}
			}
		}
		if changed {
			self.version_info += 1;
		}
		changed
	}

	/// Subtract `other` from self. Deletions are collected during the scan
	/// and applied afterwards; a cluster whose backend list empties out is
	/// dropped with it.
	pub fn remove(&mut self, other: &Eds) -> bool {
		let mut changed = false;
		for del_resource in &other.resources {
			if let Some(current) = self
				.resources
				.iter_mut()
				.find(|r| r.cluster_name == del_resource.cluster_name)
			{
				let before = current.lb_endpoints.len();
				current
					.lb_endpoints
					.retain(|e| !del_resource.lb_endpoints.iter().any(|d| d.same_backend(e)));
				if current.lb_endpoints.len() != before {
					changed = true;
				}
			}
		}
		if changed {
			self.resources.retain(|r| !r.lb_endpoints.is_empty());
			self.version_info += 1;
		}
		changed
	}

	/// Project the document down to the single `(address, port)` backend of
	/// the target cluster. Everything else is dropped; a target cluster
	/// without that backend is dropped too.
	pub fn remove_without_request(&mut self, spec: &ServerSpec, endpoint_uuid: &str) {
		let target = LbEndpoint::new(&spec.address, spec.port);
		self.resources.retain_mut(|resource| {
			if resource.cluster_name != endpoint_uuid {
				return false;
			}
			resource.lb_endpoints.retain(|e| e.same_backend(&target));
			!resource.lb_endpoints.is_empty()
		});
	}

	/// Project the document down to the whole resource of the target
	/// cluster, backends included.
	pub fn retain_cluster(&mut self, endpoint_uuid: &str) {
		self.resources.retain(|r| r.cluster_name == endpoint_uuid);
	}

	pub fn set_empty(&mut self) {
		self.resources.clear();
	}
}

mod wire {
	use serde::{Deserialize, Serialize};

	const LOAD_ASSIGNMENT_TYPE: &str = "type.googleapis.com/envoy.api.v2.ClusterLoadAssignment";

	#[derive(Debug, Clone, Serialize, Deserialize)]
	pub struct LoadAssignment {
		#[serde(rename = "@type")]
		type_url: String,
		cluster_name: String,
		endpoints: Vec<EndpointGroup>,
	}

	#[derive(Debug, Clone, Serialize, Deserialize)]
	struct EndpointGroup {
		lb_endpoints: Vec<LbEndpoint>,
	}

	#[derive(Debug, Clone, Serialize, Deserialize)]
	pub struct LbEndpoint {
		endpoint: Endpoint,
	}

	#[derive(Debug, Clone, Serialize, Deserialize)]
	struct Endpoint {
		address: Address,
	}

	#[derive(Debug, Clone, Serialize, Deserialize)]
	struct Address {
		socket_address: SocketAddress,
	}

	#[derive(Debug, Clone, Serialize, Deserialize)]
	struct SocketAddress {
		address: String,
		#[serde(deserialize_with = "crate::serdes::lenient_u16")]
		port_value: u16,
	}

	impl From<LoadAssignment> for super::LoadAssignment {
		fn from(wire: LoadAssignment) -> Self {
			let lb_endpoints = wire
				.endpoints
				.into_iter()
				.flat_map(|group| group.lb_endpoints)
				.map(super::LbEndpoint::from)
				.collect();
			super::LoadAssignment {
				cluster_name: wire.cluster_name,
				lb_endpoints,
			}
		}
	}

	impl From<super::LoadAssignment> for LoadAssignment {
		fn from(assignment: super::LoadAssignment) -> Self {
			LoadAssignment {
				type_url: LOAD_ASSIGNMENT_TYPE.to_string(),
				cluster_name: assignment.cluster_name,
				endpoints: vec![EndpointGroup {
					lb_endpoints: assignment
						.lb_endpoints
						.into_iter()
						.map(LbEndpoint::from)
						.collect(),
				}],
			}
		}
	}

	impl From<LbEndpoint> for super::LbEndpoint {
		fn from(wire: LbEndpoint) -> Self {
			super::LbEndpoint {
				address: wire.endpoint.address.socket_address.address,
				port_value: wire.endpoint.address.socket_address.port_value,
			}
		}
	}

	impl From<super::LbEndpoint> for LbEndpoint {
		fn from(endpoint: super::LbEndpoint) -> Self {
			LbEndpoint {
				endpoint: Endpoint {
					address: Address {
						socket_address: SocketAddress {
							address: endpoint.address,
							port_value: endpoint.port_value,
						},
					},
				},
			}
		}
	}
}

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Cluster Discovery document: one EDS-backed cluster per endpoint, named by
/// the endpoint uuid.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Cds {
	#[serde(with = "crate::serdes::version_string")]
	pub version_info: u64,
	pub resources: Vec<Cluster>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "wire::Cluster", into = "wire::Cluster")]
pub struct Cluster {
	pub name: String,
	pub service_name: String,
	pub lb_policy: String,
}

impl Cluster {
	pub fn new(endpoint_uuid: &str) -> Self {
		Cluster {
			name: endpoint_uuid.to_string(),
			service_name: endpoint_uuid.to_string(),
			lb_policy: wire::LB_POLICY.to_string(),
		}
	}
}

impl Cds {
	pub fn apply_request(&mut self, endpoint_uuid: &str) {
		self.resources = vec![Cluster::new(endpoint_uuid)];
	}

	/// Merge `other` into self, keyed by cluster name. On duplicate names in
	/// `other` the first occurrence wins.
	pub fn add(&mut self, other: &Cds) -> bool {
		let mut changed = false;
		let mut seen = HashSet::new();
		for new_cluster in &other.resources {
			if !seen.insert(new_cluster.name.as_str()) {
				continue;
			}
			match self
				.resources
				.iter()
				.position(|c| c.name == new_cluster.name)
			{
				Some(idx) => {
					if self.resources[idx] != *new_cluster {
						self.resources[idx] = new_cluster.clone();
						changed = true;
					}
				},
				None => {
					self.resources.push(new_cluster.clone());
					changed = true;
				},
			}
		}
		if changed {
			self.version_info += 1;
		}
		changed
	}

	pub fn remove(&mut self, other: &Cds) -> bool {
		let before = self.resources.len();
		self
			.resources
			.retain(|c| !other.resources.iter().any(|d| d.name == c.name));
		let changed = self.resources.len() != before;
		if changed {
			self.version_info += 1;
		}
		changed
	}

	/// Project the document down to the cluster owned by `endpoint_uuid`.
	pub fn remove_without_request(&mut self, endpoint_uuid: &str) {
		self.resources.retain(|c| c.name == endpoint_uuid);
	}

	pub fn set_empty(&mut self) {
		self.resources.clear();
	}
}

mod wire {
	use serde::{Deserialize, Serialize};

	const CLUSTER_TYPE: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
	const CONNECT_TIMEOUT: &str = "0.25s";
	const DISCOVERY_TYPE: &str = "EDS";
	const EDS_CONFIG_PATH: &str = "/etc/envoy/eds.json";
	pub const LB_POLICY: &str = "ROUND_ROBIN";

	#[derive(Debug, Clone, Serialize, Deserialize)]
	pub struct Cluster {
		#[serde(rename = "@type")]
		type_url: String,
		name: String,
		connect_timeout: String,
		lb_policy: String,
		#[serde(rename = "type")]
		kind: String,
		eds_cluster_config: EdsClusterConfig,
	}

	#[derive(Debug, Clone, Serialize, Deserialize)]
	struct EdsClusterConfig {
		service_name: String,
		eds_config: EdsConfig,
	}

	#[derive(Debug, Clone, Serialize, Deserialize)]
	struct EdsConfig {
		path: String,
	}

	impl From<Cluster> for super::Cluster {
		fn from(wire: Cluster) -> Self {
			super::Cluster {
				name: wire.name,
				service_name: wire.eds_cluster_config.service_name,
				lb_policy: wire.lb_policy,
			}
		}
	}

	impl From<super::Cluster> for Cluster {
		fn from(cluster: super::Cluster) -> Self {
			Cluster {
				type_url: CLUSTER_TYPE.to_string(),
				name: cluster.name,
				connect_timeout: CONNECT_TIMEOUT.to_string(),
				lb_policy: cluster.lb_policy,
				kind: DISCOVERY_TYPE.to_string(),
				eds_cluster_config: EdsClusterConfig {
					service_name: cluster.service_name,
					eds_config: EdsConfig {
						path: EDS_CONFIG_PATH.to_string(),
					},
				},
			}
		}
	}
}

use serde::{Deserialize, Serialize};

use crate::types::request::{EndpointSpec, HeaderEntry, RouteSpec};

/// Listener Discovery document: one resource per listener port, one route
/// per URL prefix within it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Lds {
	#[serde(with = "crate::serdes::version_string")]
	pub version_info: u64,
	pub resources: Vec<Listener>,
}

/// One LDS resource. In memory only the listener port and its routes are
/// kept; the surrounding filter-chain scaffolding is constant and is
/// re-emitted on serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "wire::Listener", into = "wire::Listener")]
pub struct Listener {
	pub port_value: String,
	pub routes: Vec<Route>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "wire::Route", into = "wire::Route")]
pub struct Route {
	pub prefix: String,
	pub cluster_name: String,
	pub request_headers_to_add: Vec<HeaderEntry>,
}

impl Listener {
	pub fn new(port_value: &str, route: Route) -> Self {
		Listener {
			port_value: port_value.to_string(),
			routes: vec![route],
		}
	}
}

impl Route {
	pub fn new(spec: &RouteSpec, endpoint_uuid: &str) -> Self {
		Route {
			prefix: spec.prefix.clone(),
			cluster_name: endpoint_uuid.to_string(),
			request_headers_to_add: spec.request_headers_to_add.clone(),
		}
	}

	/// The Host header carried by this route, if any.
	pub fn host_header(&self) -> &str {
		self
			.request_headers_to_add
			.iter()
			.find(|e| e.header.key == "Host")
			.map(|e| e.header.value.as_str())
			.unwrap_or("")
	}
}

impl Lds {
	/// Replace the document with the single-resource tree described by the
	/// request payload.
	pub fn apply_request(&mut self, spec: &EndpointSpec, endpoint_uuid: &str) {
		self.resources = vec![Listener::new(
			&spec.port_value,
			Route::new(&spec.route, endpoint_uuid),
		)];
	}

	/// Merge `other` into self. Resources are keyed by port, routes within a
	/// resource by prefix; an existing route whose content differs is
	/// replaced wholesale.
	pub fn add(&mut self, other: &Lds) -> bool {
		let mut changed = false;
		for new_resource in &other.resources {
			let Some(idx) = self
				.resources
				.iter()
				.position(|r| r.port_value == new_resource.port_value)
			else {
				self.resources.push(new_resource.clone());
				changed = true;
				continue;
			};
			let current = &mut self.resources[idx];
			for new_route in &new_resource.routes {
				match current
					.routes
					.iter()
					.position(|rt| rt.prefix == new_route.prefix)
				{
					Some(ix) => {
						if current.routes[ix] != *new_route {
							current.routes[ix] = new_route.clone();
							changed = true;
						}
					},
					None => {
						current.routes.push(new_route.clone());
						changed = true;
					},
				}
			}
		}
		if changed {
			self.version_info += 1;
		}
		changed
	}

	/// Subtract `other` from self. Deletions are collected during the scan
	/// and applied afterwards; a resource whose route list empties out is
	/// dropped with it.
	pub fn remove(&mut self, other: &Lds) -> bool {
		let mut changed = false;
		for del_resource in &other.resources {
			if let Some(current) = self
				.resources
				.iter_mut()
				.find(|r| r.port_value == del_resource.port_value)
			{
				let before = current.routes.len();
				current
					.routes
					.retain(|rt| !del_resource.routes.iter().any(|d| d.prefix == rt.prefix));
				if current.routes.len() != before {
					changed = true;
				}
			}
		}
		if changed {
			self.resources.retain(|r| !r.routes.is_empty());
			self.version_info += 1;
		}
		changed
	}

	/// Project the document down to the routes owned by `endpoint_uuid`.
	/// Resources containing no match are dropped entirely.
	pub fn remove_without_request(&mut self, endpoint_uuid: &str) {
		self.resources.retain_mut(|resource| {
			let matched = resource
				.routes
				.iter()
				.any(|rt| rt.cluster_name == endpoint_uuid);
			if matched {
				resource.routes.retain(|rt| rt.cluster_name == endpoint_uuid);
			}
			matched
		});
	}

	pub fn set_empty(&mut self) {
		self.resources.clear();
	}
}

/// The on-disk listener shape. Loading flattens every filter chain into the
/// flat route list; emitting rebuilds the canonical single-chain form.
mod wire {
	use serde::{Deserialize, Serialize};

	use crate::types::request::HeaderEntry;

	const LISTENER_TYPE: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
	const WILDCARD_ADDRESS: &str = "0.0.0.0";
	const HCM_NAME: &str = "envoy.filters.network.http_connection_manager";
	const HCM_TYPE: &str = "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
	const ACCESS_LOG_NAME: &str = "envoy.access_loggers.file";
	const ACCESS_LOG_TYPE: &str =
		"type.googleapis.com/envoy.extensions.access_loggers.file.v3.FileAccessLog";
	const ACCESS_LOG_PATH: &str = "/dev/stdout";
	const STAT_PREFIX: &str = "ingress_http";
	const CODEC_TYPE: &str = "AUTO";
	const ROUTE_CONFIG_NAME: &str = "local_route";
	const VIRTUAL_HOST_NAME: &str = "local_service";
	const ROUTER_FILTER_NAME: &str = "envoy.filters.http.router";

	#[derive(Debug, Clone, Serialize, Deserialize)]
	pub struct Listener {
		#[serde(rename = "@type")]
		type_url: String,
		address: Address,
		filter_chains: Vec<FilterChain>,
	}

	#[derive(Debug, Clone, Serialize, Deserialize)]
	struct Address {
		socket_address: SocketAddress,
	}

	#[derive(Debug, Clone, Serialize, Deserialize)]
	struct SocketAddress {
		address: String,
		port_value: String,
	}

	#[derive(Debug, Clone, Serialize, Deserialize)]
	struct FilterChain {
		filters: Vec<Filter>,
	}

	#[derive(Debug, Clone, Serialize, Deserialize)]
	struct Filter {
		name: String,
		typed_config: HttpConnectionManager,
	}

	#[derive(Debug, Clone, Serialize, Deserialize)]
	struct HttpConnectionManager {
		#[serde(rename = "@type")]
		type_url: String,
		access_log: Vec<AccessLog>,
		stat_prefix: String,
		codec_type: String,
		route_config: RouteConfig,
		http_filters: Vec<HttpFilter>,
	}

	#[derive(Debug, Clone, Serialize, Deserialize)]
	struct AccessLog {
		name: String,
		typed_config: AccessLogConfig,
	}

	#[derive(Debug, Clone, Serialize, Deserialize)]
	struct AccessLogConfig {
		#[serde(rename = "@type")]
		type_url: String,
		path: String,
	}

	#[derive(Debug, Clone, Serialize, Deserialize)]
	struct RouteConfig {
		name: String,
		virtual_hosts: Vec<VirtualHost>,
	}

	#[derive(Debug, Clone, Serialize, Deserialize)]
	struct VirtualHost {
		name: String,
		domains: Vec<String>,
		routes: Vec<Route>,
	}

	#[derive(Debug, Clone, Serialize, Deserialize)]
	struct HttpFilter {
		name: String,
		typed_config: serde_json::Value,
	}

	#[derive(Debug, Clone, Serialize, Deserialize)]
	pub struct Route {
		#[serde(rename = "match")]
		matcher: RouteMatch,
		request_headers_to_add: Vec<HeaderEntry>,
		route: RouteAction,
	}

	#[derive(Debug, Clone, Serialize, Deserialize)]
	struct RouteMatch {
		prefix: String,
	}

	#[derive(Debug, Clone, Serialize, Deserialize)]
	struct RouteAction {
		cluster: String,
	}

	impl From<Listener> for super::Listener {
		fn from(wire: Listener) -> Self {
			let routes = wire
				.filter_chains
				.into_iter()
				.flat_map(|chain| chain.filters)
				.flat_map(|filter| filter.typed_config.route_config.virtual_hosts)
				.flat_map(|vhost| vhost.routes)
				.map(super::Route::from)
				.collect();
			super::Listener {
				port_value: wire.address.socket_address.port_value,
				routes,
			}
		}
	}

	impl From<super::Listener> for Listener {
		fn from(listener: super::Listener) -> Self {
			Listener {
				type_url: LISTENER_TYPE.to_string(),
				address: Address {
					socket_address: SocketAddress {
						address: WILDCARD_ADDRESS.to_string(),
						port_value: listener.port_value,
					},
				},
				filter_chains: vec![FilterChain {
					filters: vec![Filter {
						name: HCM_NAME.to_string(),
						typed_config: HttpConnectionManager {
							type_url: HCM_TYPE.to_string(),
							access_log: vec![AccessLog {
								name: ACCESS_LOG_NAME.to_string(),
								typed_config: AccessLogConfig {
									type_url: ACCESS_LOG_TYPE.to_string(),
									path: ACCESS_LOG_PATH.to_string(),
								},
							}],
							stat_prefix: STAT_PREFIX.to_string(),
							codec_type: CODEC_TYPE.to_string(),
							route_config: RouteConfig {
								name: ROUTE_CONFIG_NAME.to_string(),
								virtual_hosts: vec![VirtualHost {
									name: VIRTUAL_HOST_NAME.to_string(),
									domains: vec!["*".to_string()],
									routes: listener.routes.into_iter().map(Route::from).collect(),
								}],
							},
							http_filters: vec![HttpFilter {
								name: ROUTER_FILTER_NAME.to_string(),
								typed_config: serde_json::Value::Object(Default::default()),
							}],
						},
					}],
				}],
			}
		}
	}

	impl From<Route> for super::Route {
		fn from(wire: Route) -> Self {
			super::Route {
				prefix: wire.matcher.prefix,
				cluster_name: wire.route.cluster,
				request_headers_to_add: wire.request_headers_to_add,
			}
		}
	}

	impl From<super::Route> for Route {
		fn from(route: super::Route) -> Self {
			Route {
				matcher: RouteMatch {
					prefix: route.prefix,
				},
				request_headers_to_add: route.request_headers_to_add,
				route: RouteAction {
					cluster: route.cluster_name,
				},
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::types::request::HeaderEntry;

	fn listener_doc() -> serde_json::Value {
		json!({
			"version_info": "3",
			"resources": [
				{
					"@type": "type.googleapis.com/envoy.config.listener.v3.Listener",
					"address": {"socket_address": {"address": "0.0.0.0", "port_value": "18080"}},
					"filter_chains": [
						{
							"filters": [
								{
									"name": "envoy.filters.network.http_connection_manager",
									"typed_config": {
										"@type": "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager",
										"access_log": [
											{
												"name": "envoy.access_loggers.file",
												"typed_config": {
													"@type": "type.googleapis.com/envoy.extensions.access_loggers.file.v3.FileAccessLog",
													"path": "/dev/stdout"
												}
											}
										],
										"stat_prefix": "ingress_http",
										"codec_type": "AUTO",
										"route_config": {
											"name": "local_route",
											"virtual_hosts": [
												{
													"name": "local_service",
													"domains": ["*"],
													"routes": [
														{
															"match": {"prefix": "/"},
															"request_headers_to_add": [
																{"header": {"key": "Host", "value": "www.example.com"}, "append": false}
															],
															"route": {"cluster": "0123456789abcdef0123456789abcdef"}
														}
													]
												}
											]
										},
										"http_filters": [
											{"name": "envoy.filters.http.router", "typed_config": {}}
										]
									}
								}
							]
						}
					]
				}
			]
		})
	}

	fn route(prefix: &str, cluster: &str, host: &str) -> Route {
		Route {
			prefix: prefix.to_string(),
			cluster_name: cluster.to_string(),
			request_headers_to_add: vec![HeaderEntry::host(host)],
		}
	}

	#[test]
	fn round_trip() {
		let doc: Lds = serde_json::from_value(listener_doc()).unwrap();
		assert_eq!(doc.version_info, 3);
		assert_eq!(doc.resources.len(), 1);
		assert_eq!(doc.resources[0].port_value, "18080");
		assert_eq!(doc.resources[0].routes.len(), 1);
		assert_eq!(doc.resources[0].routes[0].prefix, "/");
		assert_eq!(doc.resources[0].routes[0].host_header(), "www.example.com");
		assert_eq!(serde_json::to_value(&doc).unwrap(), listener_doc());
	}

	#[test]
	fn add_new_listener_bumps_version() {
		let mut doc = Lds::default();
		let mut other = Lds::default();
		other.resources = vec![Listener::new("18080", route("/", "c1", "a.example.com"))];
		assert!(doc.add(&other));
		assert_eq!(doc.version_info, 1);
		assert_eq!(doc.resources.len(), 1);
		// Identical merge is a no-op and keeps the version stable.
		assert!(!doc.add(&other));
		assert_eq!(doc.version_info, 1);
	}

	#[test]
	fn add_appends_route_to_existing_listener() {
		let mut doc = Lds::default();
		let mut one = Lds::default();
		one.resources = vec![Listener::new("18080", route("/", "c1", "a.example.com"))];
		doc.add(&one);

		let mut two = Lds::default();
		two.resources = vec![Listener::new("18080", route("/api", "c2", "b.example.com"))];
		assert!(doc.add(&two));
		assert_eq!(doc.resources.len(), 1);
		assert_eq!(doc.resources[0].routes.len(), 2);
		assert_eq!(doc.version_info, 2);

		// Prefixes stay unique within a listener.
		let prefixes: Vec<_> = doc.resources[0].routes.iter().map(|r| &r.prefix).collect();
		assert_eq!(prefixes, ["/", "/api"]);
	}

	#[test]
	fn add_replaces_route_with_different_content() {
		let mut doc = Lds::default();
		let mut one = Lds::default();
		one.resources = vec![Listener::new("18080", route("/", "c1", "a.example.com"))];
		doc.add(&one);

		let mut two = Lds::default();
		two.resources = vec![Listener::new("18080", route("/", "c1", "other.example.com"))];
		assert!(doc.add(&two));
		assert_eq!(doc.resources[0].routes.len(), 1);
		assert_eq!(doc.resources[0].routes[0].host_header(), "other.example.com");
		assert_eq!(doc.version_info, 2);
	}

	#[test]
	fn remove_drops_route_and_empty_listener() {
		let mut doc = Lds::default();
		let mut one = Lds::default();
		one.resources = vec![Listener::new("18080", route("/", "c1", "a.example.com"))];
		doc.add(&one);

		let mut del = Lds::default();
		del.resources = vec![Listener::new("18080", route("/", "c1", "a.example.com"))];
		assert!(doc.remove(&del));
		assert!(doc.resources.is_empty());
		assert_eq!(doc.version_info, 2);

		// Removing from an absent port is a no-op.
		assert!(!doc.remove(&del));
		assert_eq!(doc.version_info, 2);
	}

	#[test]
	fn remove_keeps_listener_with_remaining_routes() {
		let mut doc = Lds::default();
		let mut one = Lds::default();
		one.resources = vec![Listener {
			port_value: "18080".to_string(),
			routes: vec![
				route("/", "c1", "a.example.com"),
				route("/api", "c2", "b.example.com"),
			],
		}];
		doc.add(&one);

		let mut del = Lds::default();
		del.resources = vec![Listener::new("18080", route("/", "c1", "a.example.com"))];
		assert!(doc.remove(&del));
		assert_eq!(doc.resources.len(), 1);
		assert_eq!(doc.resources[0].routes.len(), 1);
		assert_eq!(doc.resources[0].routes[0].prefix, "/api");
	}

	#[test]
	fn remove_without_request_projects_matching_routes() {
		let mut doc = Lds::default();
		doc.resources = vec![
			Listener {
				port_value: "18080".to_string(),
				routes: vec![
					route("/", "c1", "a.example.com"),
					route("/api", "c2", "b.example.com"),
				],
			},
			Listener::new("18081", route("/", "c3", "c.example.com")),
		];

		doc.remove_without_request("c2");
		assert_eq!(doc.resources.len(), 1);
		assert_eq!(doc.resources[0].port_value, "18080");
		assert_eq!(doc.resources[0].routes.len(), 1);
		assert_eq!(doc.resources[0].routes[0].cluster_name, "c2");
	}
}

use serde::Serialize;

use crate::store;
use crate::types::ProxyConfig;
use crate::types::lds::{Listener, Route};
use crate::types::request::HeaderEntry;

const LISTEN_ADDRESS: &str = "0.0.0.0";
const WILDCARD_DOMAIN: &str = "*";

/// Externally visible projection of the configuration: one entry per
/// listener, each carrying its routes in either the short or the full
/// (backend-joined) form.
#[derive(Debug, Serialize)]
pub struct Listing<R: Serialize> {
	pub endpoints: Vec<ListenerView<R>>,
}

#[derive(Debug, Serialize)]
pub struct ListenerView<R: Serialize> {
	pub address: &'static str,
	pub port_value: String,
	pub filters: Vec<FilterView<R>>,
}

#[derive(Debug, Serialize)]
pub struct FilterView<R: Serialize> {
	pub domains: Vec<&'static str>,
	pub routes: Vec<R>,
}

#[derive(Debug, Serialize)]
pub struct RouteShort {
	pub endpoint_uuid: String,
	pub prefix: String,
	pub request_headers_to_add: Vec<HeaderEntry>,
}

#[derive(Debug, Serialize)]
pub struct RouteFull {
	pub endpoint_uuid: String,
	pub prefix: String,
	pub request_headers_to_add: Vec<HeaderEntry>,
	pub lb_policy: String,
	pub endpoints: Vec<BackendServer>,
}

#[derive(Debug, Serialize)]
pub struct BackendServer {
	pub server_uuid: String,
	pub address: BackendAddress,
}

#[derive(Debug, Serialize)]
pub struct BackendAddress {
	pub socket_address: BackendSocketAddress,
}

#[derive(Debug, Serialize)]
pub struct BackendSocketAddress {
	pub address: String,
	pub port_value: u16,
}

fn listener_view<R: Serialize>(listener: &Listener, routes: Vec<R>) -> ListenerView<R> {
	ListenerView {
		address: LISTEN_ADDRESS,
		port_value: listener.port_value.clone(),
		filters: vec![FilterView {
			domains: vec![WILDCARD_DOMAIN],
			routes,
		}],
	}
}

fn route_short(listener: &Listener, route: &Route) -> RouteShort {
	RouteShort {
		endpoint_uuid: store::endpoint_uuid(&listener.port_value, &route.prefix),
		prefix: route.prefix.clone(),
		request_headers_to_add: route.request_headers_to_add.clone(),
	}
}

/// Short listing of every listener and route.
pub fn list_short(conf: &ProxyConfig) -> Listing<RouteShort> {
	let endpoints = conf
		.lds
		.resources
		.iter()
		.map(|listener| {
			let routes = listener
				.routes
				.iter()
				.map(|route| route_short(listener, route))
				.collect();
			listener_view(listener, routes)
		})
		.collect();
	Listing { endpoints }
}

/// Short projection of the single route at the indexed position.
pub fn endpoint_short(
	conf: &ProxyConfig,
	resource_idx: usize,
	route_idx: usize,
) -> Option<Listing<RouteShort>> {
	let listener = conf.lds.resources.get(resource_idx)?;
	let route = listener.routes.get(route_idx)?;
	Some(Listing {
		endpoints: vec![listener_view(listener, vec![route_short(listener, route)])],
	})
}

/// Full projection of the single route at the indexed position, joined with
/// its cluster and backends. The route's cluster name selects the CDS
/// cluster, whose service name selects the EDS load assignment.
pub fn endpoint_full(
	conf: &ProxyConfig,
	resource_idx: usize,
	route_idx: usize,
) -> Option<Listing<RouteFull>> {
	let listener = conf.lds.resources.get(resource_idx)?;
	let route = listener.routes.get(route_idx)?;

	let cluster = conf
		.cds
		.resources
		.iter()
		.find(|c| c.name == route.cluster_name)?;

	let backends = conf
		.eds
		.resources
		.iter()
		.find(|r| r.cluster_name == cluster.service_name)
		.map(|assignment| {
			assignment
				.lb_endpoints
				.iter()
				.map(|endpoint| BackendServer {
					server_uuid: store::server_uuid(&endpoint.address, endpoint.port_value),
					address: BackendAddress {
						socket_address: BackendSocketAddress {
							address: endpoint.address.clone(),
							port_value: endpoint.port_value,
						},
					},
				})
				.collect()
		})
		.unwrap_or_default();

	let full = RouteFull {
		endpoint_uuid: store::endpoint_uuid(&listener.port_value, &route.prefix),
		prefix: route.prefix.clone(),
		request_headers_to_add: route.request_headers_to_add.clone(),
		lb_policy: cluster.lb_policy.clone(),
		endpoints: backends,
	};
	Some(Listing {
		endpoints: vec![listener_view(listener, vec![full])],
	})
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RequestError {
	#[error("Invalid parameter given in '{0}'")]
	InvalidParameter(&'static str),
}

/// Whether a queued request merges into or subtracts from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
	Add,
	Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
	pub key: String,
	pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderEntry {
	pub header: Header,
	pub append: bool,
}

impl HeaderEntry {
	pub fn host(value: &str) -> Self {
		HeaderEntry {
			header: Header {
				key: "Host".to_string(),
				value: value.to_string(),
			},
			append: false,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSpec {
	pub prefix: String,
	pub request_headers_to_add: Vec<HeaderEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSpec {
	pub port_value: String,
	pub route: RouteSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSpec {
	#[serde(deserialize_with = "crate::serdes::lenient_u16")]
	pub port: u16,
	pub address: String,
}

/// One entry on the request queue. The wire form is the same JSON envelope
/// the HTTP surface accepted: a mode, exactly one payload case, and the
/// uuid of the owning endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRequest {
	pub mode: Mode,
	#[serde(flatten)]
	pub payload: Payload,
	pub endpoint_uuid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
	#[serde(rename = "endpoints")]
	Endpoints(EndpointSpec),
	#[serde(rename = "servers")]
	Servers(ServerSpec),
}

impl ConfigRequest {
	/// Build a validated endpoint request. The Host header ends up as the
	/// single `request_headers_to_add` entry of the route.
	pub fn endpoint(
		mode: Mode,
		port_value: &str,
		prefix: &str,
		host_header: &str,
		endpoint_uuid: &str,
	) -> Result<Self, RequestError> {
		if port_value.is_empty() || port_value.parse::<u16>().is_err() {
			return Err(RequestError::InvalidParameter("port_value"));
		}
		if prefix.is_empty() || !prefix.contains('/') {
			return Err(RequestError::InvalidParameter("route"));
		}
		if host_header.is_empty() || !host_header.contains('.') {
			return Err(RequestError::InvalidParameter("host_header"));
		}
		if endpoint_uuid.len() != 32 {
			return Err(RequestError::InvalidParameter("endpoint_uuid"));
		}
		Ok(ConfigRequest {
			mode,
			payload: Payload::Endpoints(EndpointSpec {
				port_value: port_value.to_string(),
				route: RouteSpec {
					prefix: prefix.to_string(),
					request_headers_to_add: vec![HeaderEntry::host(host_header)],
				},
			}),
			endpoint_uuid: endpoint_uuid.to_string(),
		})
	}

	/// Build a validated backend-server request.
	pub fn server(
		mode: Mode,
		address: &str,
		port: u16,
		endpoint_uuid: &str,
	) -> Result<Self, RequestError> {
		if port == 0 {
			return Err(RequestError::InvalidParameter("port"));
		}
		if address.is_empty() || !address.contains('.') {
			return Err(RequestError::InvalidParameter("address"));
		}
		if endpoint_uuid.len() != 32 {
			return Err(RequestError::InvalidParameter("endpoint_uuid"));
		}
		Ok(ConfigRequest {
			mode,
			payload: Payload::Servers(ServerSpec {
				port,
				address: address.to_string(),
			}),
			endpoint_uuid: endpoint_uuid.to_string(),
		})
	}
}

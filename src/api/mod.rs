pub mod response;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::store::{self, Repository, StoreError};
use crate::types::request::{ConfigRequest, Mode, RequestError};

const MSG_ACCEPTED: &str = "Operation was accepted.";
const MSG_ENDPOINT_EXISTS: &str = "Specified 'port' with 'route' is already registered.";
const MSG_SERVER_EXISTS: &str = "Specified server 'address' with 'port' is already registered.";
const MSG_ENDPOINT_NOT_FOUND: &str = "Target endpoint was not found.";
const MSG_SERVER_NOT_FOUND: &str = "Target server was not found.";

#[derive(Debug, Error)]
pub enum ApiError {
	#[error(transparent)]
	InvalidParameter(#[from] RequestError),
	#[error("{0}")]
	NotFound(&'static str),
	#[error("{0}")]
	Duplicate(&'static str),
	#[error("store unavailable: {0}")]
	Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = match &self {
			ApiError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
			ApiError::NotFound(_) => StatusCode::NOT_FOUND,
			ApiError::Duplicate(_) => StatusCode::CONFLICT,
			ApiError::Store(e) => {
				error!(error = %e, "store request failed");
				StatusCode::SERVICE_UNAVAILABLE
			},
		};
		(status, Json(json!({"message": self.to_string()}))).into_response()
	}
}

/// The HTTP surface. Handlers never touch the configuration directly: reads
/// go through the snapshot and the two indexes, writes are enqueued for the
/// worker.
#[derive(Clone)]
pub struct App {
	repo: Arc<dyn Repository>,
}

impl App {
	pub fn new(repo: Arc<dyn Repository>) -> Self {
		Self { repo }
	}

	pub fn router(&self) -> Router {
		Router::new()
			.route("/v1/endpoints", post(create_endpoint).get(list_endpoints))
			.route(
				"/v1/endpoints/{endpoint_uuid}",
				get(get_endpoint).delete(delete_endpoint),
			)
			.route(
				"/v1/endpoints/{endpoint_uuid}/servers",
				post(create_server).get(list_servers),
			)
			.route(
				"/v1/endpoints/{endpoint_uuid}/servers/{server_uuid}",
				axum::routing::delete(delete_server),
			)
			.with_state(self.clone())
	}
}

type Accepted = (StatusCode, Json<serde_json::Value>);

fn accepted() -> Accepted {
	(StatusCode::ACCEPTED, Json(json!({"message": MSG_ACCEPTED})))
}

#[derive(Debug, Deserialize)]
struct CreateEndpointBody {
	port_value: String,
	route: String,
	host_header: String,
}

#[derive(Debug, Deserialize)]
struct CreateServerBody {
	address: String,
	#[serde(deserialize_with = "crate::serdes::lenient_u16")]
	port: u16,
}

async fn create_endpoint(
	State(app): State<App>,
	Json(body): Json<CreateEndpointBody>,
) -> Result<Accepted, ApiError> {
	let endpoint_uuid = store::endpoint_uuid(&body.port_value, &body.route);
	if app.repo.endpoint_index(&endpoint_uuid).await?.is_some() {
		return Err(ApiError::Duplicate(MSG_ENDPOINT_EXISTS));
	}

	let request = ConfigRequest::endpoint(
		Mode::Add,
		&body.port_value,
		&body.route,
		&body.host_header,
		&endpoint_uuid,
	)?;
	app.repo.enqueue(&request).await?;
	Ok(accepted())
}

async fn list_endpoints(State(app): State<App>) -> Result<Response, ApiError> {
	let conf = app.repo.load_snapshot().await?;
	Ok(Json(response::list_short(&conf)).into_response())
}

async fn get_endpoint(
	State(app): State<App>,
	Path(endpoint_uuid): Path<String>,
) -> Result<Response, ApiError> {
	let (resource_idx, route_idx) = app
		.repo
		.endpoint_index(&endpoint_uuid)
		.await?
		.ok_or(ApiError::NotFound(MSG_ENDPOINT_NOT_FOUND))?;

	let conf = app.repo.load_snapshot().await?;
	let listing = response::endpoint_short(&conf, resource_idx, route_idx)
		.ok_or(ApiError::NotFound(MSG_ENDPOINT_NOT_FOUND))?;
	Ok(Json(listing).into_response())
}

async fn delete_endpoint(
	State(app): State<App>,
	Path(endpoint_uuid): Path<String>,
) -> Result<Accepted, ApiError> {
	let (resource_idx, route_idx) = app
		.repo
		.endpoint_index(&endpoint_uuid)
		.await?
		.ok_or(ApiError::NotFound(MSG_ENDPOINT_NOT_FOUND))?;

	// The queue entry carries the natural keys, reconstructed from the
	// snapshot at the indexed position.
	let conf = app.repo.load_snapshot().await?;
	let listener = conf
		.lds
		.resources
		.get(resource_idx)
		.ok_or(ApiError::NotFound(MSG_ENDPOINT_NOT_FOUND))?;
	let route = listener
		.routes
		.get(route_idx)
		.ok_or(ApiError::NotFound(MSG_ENDPOINT_NOT_FOUND))?;

	let request = ConfigRequest::endpoint(
		Mode::Remove,
		&listener.port_value,
		&route.prefix,
		route.host_header(),
		&endpoint_uuid,
	)?;
	app.repo.enqueue(&request).await?;
	Ok(accepted())
}

async fn create_server(
	State(app): State<App>,
	Path(endpoint_uuid): Path<String>,
	Json(body): Json<CreateServerBody>,
) -> Result<Accepted, ApiError> {
	if app.repo.endpoint_index(&endpoint_uuid).await?.is_none() {
		return Err(ApiError::NotFound(MSG_ENDPOINT_NOT_FOUND));
	}

	let server_uuid = store::server_uuid(&body.address, body.port);
	if app.repo.server_index(&server_uuid).await?.is_some() {
		return Err(ApiError::Duplicate(MSG_SERVER_EXISTS));
	}

	let request = ConfigRequest::server(Mode::Add, &body.address, body.port, &endpoint_uuid)?;
	app.repo.enqueue(&request).await?;
	Ok(accepted())
}

async fn list_servers(
	State(app): State<App>,
	Path(endpoint_uuid): Path<String>,
) -> Result<Response, ApiError> {
	let (resource_idx, route_idx) = app
		.repo
		.endpoint_index(&endpoint_uuid)
		.await?
		.ok_or(ApiError::NotFound(MSG_ENDPOINT_NOT_FOUND))?;

	let conf = app.repo.load_snapshot().await?;
	let listing = response::endpoint_full(&conf, resource_idx, route_idx)
		.ok_or(ApiError::NotFound(MSG_ENDPOINT_NOT_FOUND))?;
	Ok(Json(listing).into_response())
}

async fn delete_server(
	State(app): State<App>,
	Path((endpoint_uuid, server_uuid)): Path<(String, String)>,
) -> Result<Accepted, ApiError> {
	if app.repo.endpoint_index(&endpoint_uuid).await?.is_none() {
		return Err(ApiError::NotFound(MSG_ENDPOINT_NOT_FOUND));
	}
	let (resource_idx, endpoint_idx) = app
		.repo
		.server_index(&server_uuid)
		.await?
		.ok_or(ApiError::NotFound(MSG_SERVER_NOT_FOUND))?;

	let conf = app.repo.load_snapshot().await?;
	let assignment = conf
		.eds
		.resources
		.get(resource_idx)
		.ok_or(ApiError::NotFound(MSG_SERVER_NOT_FOUND))?;
	let backend = assignment
		.lb_endpoints
		.get(endpoint_idx)
		.ok_or(ApiError::NotFound(MSG_SERVER_NOT_FOUND))?;

	let request = ConfigRequest::server(
		Mode::Remove,
		&backend.address,
		backend.port_value,
		&endpoint_uuid,
	)?;
	app.repo.enqueue(&request).await?;
	Ok(accepted())
}

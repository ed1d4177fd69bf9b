//! HTTP long-polling transport for the rendezvous server
//!
//! Each client opens a connection with `POST /connect`, sends events with
//! `POST /emit`, and picks up its queued events with `GET /poll`. Every
//! response to `/emit` also carries the caller's queued events, so a join
//! request returns its own `room-joined` or `error` immediately.

use crate::config::Config;
use crate::error::{ClientRequestError, GatewayError};
use crate::protocol::{ClientEvent, ConnectionId, ServerEvent};
use crate::relay::now_millis;
use crate::state::{ServerState, StoreAccess};
use serde::Serialize;
use std::str::FromStr;
use tracing::{debug, warn};
use wstd::http::{Body, Method, Request, Response};

const CONNECTION_ID_HEADER: &str = "x-connection-id";

/// Get query parameter from URI
fn get_query_param<'a>(query: Option<&'a str>, key: &str) -> Option<&'a str> {
    query?.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let k = parts.next()?;
        let v = parts.next()?;
        if k == key { Some(v) } else { None }
    })
}

/// Cross-origin headers to attach to a response
#[derive(Debug, Clone, PartialEq, Eq)]
struct Cors {
    allow_origin: Option<String>,
    credentials: bool,
}

impl Cors {
    fn for_origin(config: &Config, origin: Option<&str>) -> Self {
        if config.allows_any_origin() {
            return Self {
                allow_origin: Some("*".to_string()),
                credentials: false,
            };
        }
        match origin {
            Some(origin) if config.allows_origin(origin) => Self {
                allow_origin: Some(origin.to_string()),
                credentials: true,
            },
            _ => Self {
                allow_origin: None,
                credentials: false,
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectResponse {
    connection_id: ConnectionId,
}

#[derive(Serialize)]
struct EventsResponse {
    events: Vec<ServerEvent>,
}

#[derive(Serialize)]
struct StatusResponse {
    message: &'static str,
    status: &'static str,
    rooms: usize,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

fn respond(cors: &Cors, status: u16, content_type: Option<&str>, body: Body) -> Response<Body> {
    let mut builder = Response::builder().status(status);
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }
    if let Some(origin) = &cors.allow_origin {
        builder = builder
            .header("access-control-allow-origin", origin.as_str())
            .header("vary", "origin");
        if cors.credentials {
            builder = builder.header("access-control-allow-credentials", "true");
        }
    }
    // Header values are either constants or echoed from the request
    builder.body(body).unwrap()
}

fn text(cors: &Cors, status: u16, body: impl Into<String>) -> Response<Body> {
    let body: String = body.into();
    respond(cors, status, Some("text/plain"), Body::from(body))
}

fn json<T: Serialize>(cors: &Cors, status: u16, value: &T) -> Response<Body> {
    match serde_json::to_string(value) {
        Ok(body) => respond(cors, status, Some("application/json"), Body::from(body)),
        Err(e) => {
            warn!(error = %e, "failed to serialize response");
            text(cors, 500, "Internal Server Error")
        }
    }
}

fn client_error(cors: &Cors, err: &ClientRequestError) -> Response<Body> {
    debug!(%err, "bad request");
    text(cors, 400, err.to_string())
}

fn header_connection_id(request: &Request<Body>) -> Result<ConnectionId, ClientRequestError> {
    let value = request
        .headers()
        .get(CONNECTION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ClientRequestError::MissingConnectionId)?;
    Ok(ConnectionId::from_str(value)?)
}

fn query_connection_id(query: Option<&str>) -> Result<ConnectionId, ClientRequestError> {
    let value =
        get_query_param(query, "connection_id").ok_or(ClientRequestError::MissingConnectionId)?;
    Ok(ConnectionId::from_str(value)?)
}

/// Drain and return the queued events for a connection
fn events_for(cors: &Cors, state: &ServerState, connection_id: ConnectionId) -> Response<Body> {
    match state.gateway().poll(connection_id) {
        Ok(events) => json(cors, 200, &EventsResponse { events }),
        Err(_) => text(cors, 404, "Connection not found"),
    }
}

/// Handle an inbound client event
async fn handle_emit(request: Request<Body>, state: &ServerState, cors: &Cors) -> Response<Body> {
    let connection_id = match header_connection_id(&request) {
        Ok(id) => id,
        Err(e) => return client_error(cors, &e),
    };

    let mut body = request.into_body();
    let body_str = match body.str_contents().await {
        Ok(s) => s.to_string(),
        Err(e) => return client_error(cors, &ClientRequestError::Body(format!("{e:?}"))),
    };

    let event = match ClientEvent::from_str(&body_str) {
        Ok(event) => event,
        Err(e) => return client_error(cors, &ClientRequestError::Json(e)),
    };

    match state.gateway().handle_event(connection_id, event) {
        Err(GatewayError::UnknownConnection) => text(cors, 404, "Connection not found"),
        // Rejections are queued for the client as `error` events
        Ok(()) | Err(_) => events_for(cors, state, connection_id),
    }
}

/// Handle CORS preflight
fn handle_cors_preflight(cors: &Cors) -> Response<Body> {
    let mut builder = Response::builder().status(204);
    if let Some(origin) = &cors.allow_origin {
        builder = builder
            .header("access-control-allow-origin", origin.as_str())
            .header("access-control-allow-methods", "GET, POST, OPTIONS")
            .header(
                "access-control-allow-headers",
                "content-type, x-connection-id",
            )
            .header("access-control-max-age", "86400")
            .header("vary", "origin");
        if cors.credentials {
            builder = builder.header("access-control-allow-credentials", "true");
        }
    }
    builder.body(Body::empty()).unwrap()
}

/// How a request uses the persisted gateway state
///
/// Only requests that can change the gateway take the state file lock
/// exclusively and write it back.
pub fn store_access(method: &Method, path: &str) -> StoreAccess {
    match (method, path) {
        (&Method::OPTIONS, _) | (&Method::GET, "/health") => StoreAccess::Stateless,
        (&Method::GET, "/") => StoreAccess::ReadOnly,
        (&Method::POST, "/connect" | "/emit" | "/disconnect") | (&Method::GET, "/poll") => {
            StoreAccess::ReadWrite
        }
        _ => StoreAccess::Stateless,
    }
}

/// Response used when the shared state cannot be locked or persisted
pub fn service_unavailable() -> Response<Body> {
    Response::builder()
        .status(503)
        .header("content-type", "text/plain")
        .body(Body::from("Service Unavailable"))
        .unwrap()
}

/// Handle an HTTP request - main router
pub async fn handle_request(
    request: Request<Body>,
    state: &ServerState,
) -> Result<Response<Body>, wstd::http::Error> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let path = uri.path();
    let origin = request
        .headers()
        .get("origin")
        .and_then(|v| v.to_str().ok());
    let cors = Cors::for_origin(state.config(), origin);

    // CORS preflight
    if method == Method::OPTIONS {
        return Ok(handle_cors_preflight(&cors));
    }

    // Long-polling has no socket close, so silence stands in for disconnect
    state.gateway().reap_idle(now_millis());

    let response = match (method, path) {
        (Method::GET, "/") => json(
            &cors,
            200,
            &StatusResponse {
                message: "Rendezvous Signaling Server",
                status: "running",
                rooms: state.gateway().status().rooms,
            },
        ),
        (Method::GET, "/health") => json(
            &cors,
            200,
            &HealthResponse {
                status: "OK",
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
        ),
        (Method::POST, "/connect") => {
            let connection_id = state.gateway().connect();
            json(&cors, 200, &ConnectResponse { connection_id })
        }
        (Method::POST, "/emit") => handle_emit(request, state, &cors).await,
        (Method::GET, "/poll") => match query_connection_id(uri.query()) {
            Ok(connection_id) => events_for(&cors, state, connection_id),
            Err(e) => client_error(&cors, &e),
        },
        (Method::POST, "/disconnect") => match header_connection_id(&request) {
            Ok(connection_id) => {
                state.gateway().handle_disconnect(connection_id);
                respond(&cors, 204, None, Body::empty())
            }
            Err(e) => client_error(&cors, &e),
        },
        _ => text(&cors, 404, "Not Found"),
    };

    Ok(response)
}

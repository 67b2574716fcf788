//! imgto server - signing and archive endpoints
//!
//! Two routes:
//! - `POST /api/sign` signs a JSON object of upload parameters with the API
//!   secret, which never leaves the server
//! - `GET /api/archive?urls=[...]` fetches the listed deliveries and returns
//!   them as one zip

#![warn(unreachable_pub)]

use imgto_core::archive::{ArchiveAssembler, ArchiveEntry};
use imgto_core::media::Fetcher;
use imgto_media::{sign_params, SignatureAlgorithm};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Reply};

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Address could not be bound
    #[error("unable to bind: {0}")]
    Bind(#[from] warp::Error),
}

/// Listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

/// Shared handler state
pub struct ServerState {
    secret: Option<String>,
    algorithm: SignatureAlgorithm,
    archiver: ArchiveAssembler,
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("signing", &self.secret.is_some())
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl ServerState {
    /// State with an optional API secret and a fetcher for archive members
    #[must_use]
    pub fn new(secret: Option<String>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            secret,
            algorithm: SignatureAlgorithm::default(),
            archiver: ArchiveAssembler::new(fetcher),
        }
    }

    /// Sign with the digest the account is configured for
    #[inline]
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }
}

#[derive(Serialize)]
struct SignatureBody {
    signature: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_reply(status: StatusCode, message: impl Into<String>) -> Response {
    warp::reply::with_status(
        warp::reply::json(&ErrorBody {
            error: message.into(),
        }),
        status,
    )
    .into_response()
}

/// Stringify JSON parameter values the way they appear in a signed form
fn to_params(body: serde_json::Map<String, serde_json::Value>) -> BTreeMap<String, String> {
    body.into_iter()
        .map(|(k, v)| {
            let v = match v {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            (k, v)
        })
        .collect()
}

async fn handle_sign(
    state: Arc<ServerState>,
    body: serde_json::Map<String, serde_json::Value>,
) -> Result<Response, Infallible> {
    let Some(secret) = &state.secret else {
        tracing::error!("sign requested without an API secret");
        return Ok(error_reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            "signing is not configured",
        ));
    };
    let signature = sign_params(&to_params(body), secret, state.algorithm);
    Ok(warp::reply::json(&SignatureBody { signature }).into_response())
}

async fn handle_archive(
    state: Arc<ServerState>,
    query: HashMap<String, String>,
) -> Result<Response, Infallible> {
    let entries: Vec<ArchiveEntry> = match query.get("urls").map(|raw| serde_json::from_str(raw)) {
        Some(Ok(entries)) => entries,
        Some(Err(e)) => {
            return Ok(error_reply(StatusCode::BAD_REQUEST, format!("invalid urls: {e}")));
        }
        None => return Ok(error_reply(StatusCode::BAD_REQUEST, "missing urls")),
    };

    match state.archiver.build(&entries).await {
        Ok(bytes) => Ok(warp::reply::with_header(
            bytes.to_vec(),
            "content-type",
            "application/octet-stream",
        )
        .into_response()),
        Err(e) => {
            tracing::error!(error = %e, "archive failed");
            Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

fn with_state(
    state: Arc<ServerState>,
) -> impl Filter<Extract = (Arc<ServerState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// All routes
pub fn routes(
    state: Arc<ServerState>,
) -> impl Filter<Extract = (impl Reply,), Error = warp::Rejection> + Clone {
    let sign = warp::post()
        .and(warp::path!("api" / "sign"))
        .and(with_state(state.clone()))
        .and(warp::body::content_length_limit(64 * 1024))
        .and(warp::body::json())
        .and_then(handle_sign);

    let archive = warp::get()
        .and(warp::path!("api" / "archive"))
        .and(with_state(state))
        .and(warp::query::<HashMap<String, String>>())
        .and_then(handle_archive);

    sign.or(archive)
        .unify()
        .with(warp::trace::request())
}

/// Serve until `shutdown` resolves, returning the bound address and the
/// server future
pub fn bind(
    state: Arc<ServerState>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(SocketAddr, impl Future<Output = ()>), ServerError> {
    let (bound, server) = warp::serve(routes(state)).try_bind_with_graceful_shutdown(addr, shutdown)?;
    tracing::info!(addr = %bound, "listening");
    Ok((bound, server))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_are_stringified() {
        let body = serde_json::json!({ "timestamp": 1315060510, "eager": "q_auto:low", "x": null });
        let serde_json::Value::Object(map) = body else {
            unreachable!()
        };
        let params = to_params(map);
        assert_eq!(params["timestamp"], "1315060510");
        assert_eq!(params["eager"], "q_auto:low");
        assert_eq!(params["x"], "");
    }
}

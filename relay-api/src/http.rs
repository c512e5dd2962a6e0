//! REST surface (C8): `tide-disco` `Api`/`App` wiring over [`RelayServerState`],
//! using the usual `define_api` + `register_module` shape for a `tide_disco`
//! relay server.

use async_lock::RwLock;
use futures::FutureExt;
use relay_types::{Chain, RelayError};
use std::str::FromStr;
use tide_disco::{api::ApiError, error::ServerError, method::ReadState, Api, App, StatusCode};
use vbs::version::{StaticVersion, StaticVersionType};

use crate::state::{RelayDataSource, RelayServerState};

pub type ApiVer = StaticVersion<0, 1>;

fn to_server_error(err: RelayError) -> ServerError {
    let status = match err {
        RelayError::CircuitOpen { .. } | RelayError::EndpointUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RelayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RelayError::Unsupported { .. } => StatusCode::BAD_REQUEST,
        RelayError::AuthRejected => StatusCode::UNAUTHORIZED,
        RelayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    ServerError::catch_all(status, err.to_string())
}

fn parse_chain(raw: &str) -> Result<Chain, ServerError> {
    Chain::from_str(raw).map_err(to_server_error)
}

fn define_api() -> Result<Api<RwLock<RelayServerState>, ServerError, ApiVer>, ApiError> {
    let toml: toml::Value = toml::from_str(include_str!("../api/relay.toml"))
        .map_err(|err| ApiError::CannotReadToml { reason: err.to_string() })?;
    let mut api = Api::<RwLock<RelayServerState>, ServerError, ApiVer>::new(toml)?;

    api.get("get_latest", |req, state| {
        async move {
            let chain = parse_chain(req.string_param("chain")?)?;
            state.latest_block(chain).await.map_err(to_server_error)
        }
        .boxed()
    })?
    .get("get_by_height", |req, state| {
        async move {
            let chain = parse_chain(req.string_param("chain")?)?;
            let height = req.integer_param("height")?;
            state.block_by_height(chain, height).await.map_err(to_server_error)
        }
        .boxed()
    })?
    .get("get_by_hash", |req, state| {
        async move {
            let chain = parse_chain(req.string_param("chain")?)?;
            let hash = req.string_param("hash")?;
            state.block_by_hash(chain, hash).await.map_err(to_server_error)
        }
        .boxed()
    })?
    .get("network_info", |req, state| {
        async move {
            let chain = parse_chain(req.string_param("chain")?)?;
            state.network_info(chain).await.map_err(to_server_error)
        }
        .boxed()
    })?
    .get("health", |_req, state| {
        async move { Ok(state.health_snapshot()) }.boxed()
    })?
    .get("version", |_req, state| {
        async move { Ok(state.version_info()) }.boxed()
    })?
    .get("status", |_req, state| {
        async move { Ok(state.status_info()) }.boxed()
    })?;

    Ok(api)
}

/// Builds the served `App`, wiring in the REST module. The caller
/// additionally mounts the metrics route and the raw WebSocket upgrade
/// handler (see `ws.rs`) before calling `serve`.
pub fn build_app(state: RelayServerState) -> anyhow::Result<App<RwLock<RelayServerState>, ServerError>> {
    let api = define_api()?;
    let mut app = App::<RwLock<RelayServerState>, ServerError>::with_state(RwLock::new(state));
    app.register_module("api", api)?;
    Ok(app)
}

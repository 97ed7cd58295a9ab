use crate::error::AppError;
use crate::geo::Coordinates;
use crate::helpers::{anonymize_ip, now, token_matches};
use crate::ranking::{ClientContext, QuickplayError, RankedServers};
use crate::servers::{RankedServer, ServerRecord};
use crate::validation;
use crate::AppState;

use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::IntoResponse,
    Json,
};
use axum_extra::TypedHeader;
use axum_macros::debug_handler;
use comfig_db::KvMetadata;
use headers::authorization::Bearer;
use headers::Authorization;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

/// Store key of the published config schema.
pub(crate) const SCHEMA_KEY: &str = "schema";

#[derive(Deserialize)]
pub(crate) struct QueryRequest {
    ping: f64,
    #[serde(default)]
    version: Option<u32>,
}

#[derive(Serialize)]
#[serde(untagged)]
pub(crate) enum QueryResponse {
    Servers(Vec<RankedServer>),
    Versioned {
        servers: Vec<RankedServer>,
        until: i64,
    },
}

#[derive(Deserialize)]
pub(crate) struct UpdateRequest {
    servers: Vec<ServerRecord>,
    #[serde(default)]
    until: i64,
}

#[derive(Deserialize)]
pub(crate) struct SchemaRequest {
    schema: serde_json::Value,
}

#[derive(Deserialize)]
pub(crate) struct HudStatRequest {
    id: String,
}

#[derive(Deserialize)]
pub(crate) struct HudCountRequest {
    id: String,
    key: String,
}

#[derive(Serialize)]
pub(crate) struct SuccessResponse {
    success: bool,
}

#[derive(Serialize)]
pub(crate) struct CountResponse {
    count: i64,
}

/// Count returned when the read key is wrong.
const COUNT_UNAUTHORIZED: i64 = -2;
/// Count returned when the counter could not be read.
const COUNT_UNAVAILABLE: i64 = -1;

/// Client location from the edge's visitor location headers.
fn client_location(headers: &HeaderMap) -> Option<Coordinates> {
    let parse = |name: &str| -> Option<f64> { headers.get(name)?.to_str().ok()?.trim().parse().ok() };
    let location = Coordinates::new(parse("cf-iplatitude")?, parse("cf-iplongitude")?);
    location.is_valid().then_some(location)
}

/// Edge node that served the request, from the `<ray id>-<IATA>` ray header.
fn edge_node(headers: &HeaderMap) -> Option<String> {
    let ray = headers.get("cf-ray")?.to_str().ok()?;
    let (_, colo) = ray.rsplit_once('-')?;
    (!colo.is_empty()).then(|| colo.to_ascii_uppercase())
}

/// Client address as forwarded by the edge or the local proxy.
fn client_ip(headers: &HeaderMap, dev_mode: bool) -> Option<IpAddr> {
    ["cf-connecting-ip", "x-real-ip"]
        .iter()
        .find_map(|name| headers.get(*name)?.to_str().ok()?.trim().parse::<IpAddr>().ok())
        .or_else(|| dev_mode.then_some(IpAddr::from([127, 0, 0, 1])))
}

fn authorize(state: &AppState, token: &str) -> Result<(), AppError> {
    if token_matches(token, state.api_token.as_deref()) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

#[debug_handler]
pub(crate) async fn query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<QueryRequest>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_ping(payload.ping)?;

    let client = ClientContext {
        ping: payload.ping,
        location: client_location(&headers),
        edge_node: edge_node(&headers).unwrap_or_else(|| state.default_edge_node.clone()),
    };

    let ranked = match state.quickplay.rank_servers(&client, now()).await {
        Ok(ranked) => ranked,
        // Answer quickly with nothing rather than fail the client
        Err(err @ (QuickplayError::MissingGeolocation | QuickplayError::UnknownEdgeNode(_))) => {
            tracing::warn!(error = %err, "refusing to rank servers");
            RankedServers {
                servers: Vec::new(),
                until: 0,
            }
        }
        Err(err) => return Err(err.into()),
    };

    let response = match payload.version {
        Some(2) => QueryResponse::Versioned {
            servers: ranked.servers,
            until: ranked.until,
        },
        _ => QueryResponse::Servers(ranked.servers),
    };

    Ok(Json(response))
}

#[debug_handler]
pub(crate) async fn update(
    State(state): State<Arc<AppState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(payload): Json<UpdateRequest>,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, auth.token())?;
    validation::validate_server_list(&payload.servers)?;

    state
        .quickplay
        .publish(payload.servers, payload.until, now())
        .await?;

    Ok(Json(SuccessResponse { success: true }))
}

pub(crate) async fn schema(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let schema = state
        .quickplay
        .store()
        .kv_get(SCHEMA_KEY.to_string())
        .await?
        .map(|entry| entry.value)
        .unwrap_or_else(|| "null".to_string());

    Ok(([(header::CONTENT_TYPE, "application/json")], schema))
}

pub(crate) async fn schema_update(
    State(state): State<Arc<AppState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(payload): Json<SchemaRequest>,
) -> Result<impl IntoResponse, AppError> {
    authorize(&state, auth.token())?;

    state
        .quickplay
        .store()
        .kv_put(
            SCHEMA_KEY.to_string(),
            payload.schema.to_string(),
            KvMetadata::default(),
        )
        .await?;

    Ok(Json(SuccessResponse { success: true }))
}

pub(crate) async fn download_add(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<HudStatRequest>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_counter_id(&payload.id)?;

    let Some(ip) = client_ip(&headers, state.dev_mode) else {
        tracing::warn!(counter = %payload.id, "download without client address");
        return Ok(Json(SuccessResponse { success: false }));
    };
    let address = anonymize_ip(ip);

    let success = match state.downloads.increment(&payload.id, address, now()).await {
        Ok(accepted) => accepted,
        Err(err) => {
            tracing::error!(?err, counter = %payload.id, "failed to record download");
            false
        }
    };

    Ok(Json(SuccessResponse { success }))
}

pub(crate) async fn download_count(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<HudCountRequest>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_counter_id(&payload.id)?;

    if !token_matches(&payload.key, state.api_token.as_deref()) {
        return Ok(Json(CountResponse {
            count: COUNT_UNAUTHORIZED,
        }));
    }

    let count = match state.downloads.tally(&payload.id).await {
        Ok(count) => count,
        Err(err) => {
            tracing::error!(?err, counter = %payload.id, "failed to read download count");
            COUNT_UNAVAILABLE
        }
    };

    Ok(Json(CountResponse { count }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn test_client_location() {
        let map = headers(&[("cf-iplatitude", "47.60"), ("cf-iplongitude", "-122.33")]);
        assert_eq!(client_location(&map), Some(Coordinates::new(47.60, -122.33)));

        assert_eq!(client_location(&headers(&[("cf-iplatitude", "47.60")])), None);
        let bogus = headers(&[("cf-iplatitude", "147.60"), ("cf-iplongitude", "-122.33")]);
        assert_eq!(client_location(&bogus), None);
    }

    #[test]
    fn test_edge_node_from_ray() {
        assert_eq!(
            edge_node(&headers(&[("cf-ray", "230b030023ae2822-sjc")])),
            Some("SJC".to_string())
        );
        assert_eq!(edge_node(&headers(&[("cf-ray", "230b030023ae2822")])), None);
        assert_eq!(edge_node(&HeaderMap::new()), None);
    }

    #[test]
    fn test_client_ip_order() {
        let map = headers(&[("cf-connecting-ip", "203.0.113.5"), ("x-real-ip", "198.51.100.7")]);
        assert_eq!(client_ip(&map, false), "203.0.113.5".parse().ok());

        let map = headers(&[("x-real-ip", "198.51.100.7")]);
        assert_eq!(client_ip(&map, false), "198.51.100.7".parse().ok());

        assert_eq!(client_ip(&HeaderMap::new(), false), None);
        assert_eq!(client_ip(&HeaderMap::new(), true), "127.0.0.1".parse().ok());
    }
}

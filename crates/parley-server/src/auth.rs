use axum::async_trait;
use axum::extract::{FromRequestParts, Query};
use axum::http::header::UPGRADE;
use axum::http::request::Parts;
use parley_shared::constants::CALLER_ID_HEADER;
use parley_shared::types::UserId;
use serde::Deserialize;

use crate::error::ServerError;

/// Identity of the authenticated caller.
///
/// Taken from the `x-user-id` header. WebSocket upgrades may pass it as a
/// `user_id` query parameter instead, since browsers cannot set headers on
/// the upgrade request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub UserId);

/// Query string accepted on WebSocket upgrades.
#[derive(Deserialize)]
struct UpgradeQuery {
    user_id: UserId,
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(value) = parts.headers.get(CALLER_ID_HEADER) {
            let raw = value.to_str().map_err(|_| ServerError::Unauthorized)?;
            return UserId::parse(raw).map(Caller).map_err(|_| ServerError::Unauthorized);
        }

        if is_websocket_upgrade(parts) {
            let Query(query) = Query::<UpgradeQuery>::try_from_uri(&parts.uri)
                .map_err(|_| ServerError::Unauthorized)?;
            return Ok(Caller(query.user_id));
        }

        Err(ServerError::Unauthorized)
    }
}

fn is_websocket_upgrade(parts: &Parts) -> bool {
    parts
        .headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

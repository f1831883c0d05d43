use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{HeaderMap, HeaderValue, Method},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use domain::{PresenceSnapshot, RoomId};

use crate::{error::ApiError, state::AppState, ws_connection};

#[derive(Debug, Deserialize)]
struct ChatQuery {
    token: Option<String>,
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat", get(chat_upgrade))
        .nest("/api/v1", api_routes())
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/rooms/{room_id}/users", get(room_users))
        .route("/rooms/{room_id}/online", get(online_users))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "忽略无效的跨域来源");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// 升级前校验 `token` 查询参数，失败时直接返回 401，不建立连接
async fn chat_upgrade(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let user_id = state
        .gateway()
        .authenticate(query.token.as_deref())
        .inspect_err(|err| tracing::info!(error = %err, "拒绝未认证的连接"))?;

    let gateway = state.gateway().clone();
    Ok(ws.on_upgrade(move |socket| ws_connection::serve(socket, gateway, user_id)))
}

/// 本节点上房间的实时成员
async fn room_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> Result<Json<PresenceSnapshot>, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;
    let room_id = RoomId::parse(room_id)?;

    Ok(Json(state.runtime.presence().snapshot(&room_id).await))
}

/// 在线状态存储中记录的房间成员，多节点部署时包含其它节点的连接
async fn online_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> Result<Json<PresenceSnapshot>, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;
    let room_id = RoomId::parse(room_id)?;

    let users = state.runtime.presence().online_members(&room_id).await?;
    Ok(Json(PresenceSnapshot::new(room_id, users)))
}

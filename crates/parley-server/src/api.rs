use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State},
    http::{header, HeaderValue, Method},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use parley_shared::constants::PROTOCOL_VERSION;
use parley_shared::types::{ConversationId, MessageId, UserId};
use parley_store::{Message, ResolvedConversation, UnseenSummary};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::attachments::content_type_for;
use crate::auth::Caller;
use crate::broadcaster::Broadcaster;
use crate::chat::ChatService;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::gateway;
use crate::presence::PresenceRegistry;

/// Headroom over the attachment limit for the other multipart fields.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
    pub presence: PresenceRegistry,
    pub broadcaster: Broadcaster,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allow_origin(state.config.cors_origin.as_deref()))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/chats/resolve", post(resolve_conversation))
        .route("/chats/messages", post(send_message).delete(delete_message))
        .route("/chats/clear", post(clear_conversation))
        .route("/chats/unseen", get(list_unseen))
        .route("/chats/seen", post(mark_seen))
        .route("/attachments", post(upload_attachment))
        .route("/attachments/:id", get(download_attachment))
        .route("/ws", get(gateway::ws_handler))
        .layer(DefaultBodyLimit::max(
            state.config.max_attachment_size + BODY_LIMIT_SLACK,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn allow_origin(configured: Option<&str>) -> AllowOrigin {
    match configured.map(HeaderValue::from_str) {
        Some(Ok(origin)) => AllowOrigin::exact(origin),
        Some(Err(_)) => {
            warn!("Invalid CORS_ORIGIN, allowing any origin");
            AllowOrigin::from(Any)
        }
        None => AllowOrigin::from(Any),
    }
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    protocol: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveRequest {
    receiver_id: UserId,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest {
    chat_id: Option<ConversationId>,
    content: Option<String>,
    attachment: Option<String>,
}

#[derive(Serialize)]
struct SendMessageResponse {
    msg: &'static str,
    message: Message,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    chat_id: ConversationId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteMessageRequest {
    message_to_delete_id: MessageId,
    chat_id: ConversationId,
}

#[derive(Serialize)]
struct UploadResponse {
    msg: &'static str,
    attachment: String,
}

#[derive(Serialize)]
struct MsgResponse {
    msg: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UnseenResponse {
    unseen_messages: Vec<UnseenSummary>,
}

#[derive(Serialize)]
struct SeenResponse {
    msg: &'static str,
    updated: usize,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        protocol: PROTOCOL_VERSION,
    })
}

async fn resolve_conversation(
    State(state): State<AppState>,
    Caller(user): Caller,
    Json(body): Json<ResolveRequest>,
) -> Result<Json<ResolvedConversation>, ServerError> {
    let resolved = state.chat.resolve(user, body.receiver_id).await?;
    Ok(Json(resolved))
}

/// Accepts either a JSON body or a multipart form with an `image` file.
async fn send_message(
    State(state): State<AppState>,
    Caller(user): Caller,
    request: Request,
) -> Result<Json<SendMessageResponse>, ServerError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("multipart/form-data"))
        .unwrap_or(false);

    let (body, uploaded) = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ServerError::InvalidOperation(e.body_text()))?;
        read_send_form(&state, user, multipart).await?
    } else {
        let Json(body) = Json::<SendMessageRequest>::from_request(request, &state)
            .await
            .map_err(|e| ServerError::InvalidOperation(e.body_text()))?;
        (body, None)
    };

    let result = match body.chat_id {
        Some(chat_id) => {
            let attachment = uploaded.clone().or(body.attachment);
            state.chat.send(chat_id, user, body.content, attachment).await
        }
        None => Err(ServerError::InvalidOperation("chatId is required".into())),
    };

    let message = match result {
        Ok(message) => message,
        Err(e) => {
            // Do not keep files for messages that were never stored.
            if let Some(reference) = uploaded {
                state.chat.discard_upload(&reference).await;
            }
            return Err(e);
        }
    };

    Ok(Json(SendMessageResponse {
        msg: "Message sent successfully!",
        message,
    }))
}

/// Collect the text fields and store the `image` file, if any, as an upload
/// owned by `user`.
async fn read_send_form(
    state: &AppState,
    user: UserId,
    mut multipart: Multipart,
) -> Result<(SendMessageRequest, Option<String>), ServerError> {
    let mut body = SendMessageRequest::default();
    let mut image: Option<(bytes::Bytes, Option<String>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::InvalidOperation(format!("Multipart error: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "chatId" => {
                let raw = field.text().await.map_err(multipart_read_error)?;
                let id = uuid::Uuid::parse_str(raw.trim())
                    .map_err(|_| ServerError::InvalidOperation("Invalid chatId".into()))?;
                body.chat_id = Some(ConversationId(id));
            }
            "content" => {
                body.content = Some(field.text().await.map_err(multipart_read_error)?);
            }
            "image" => {
                let file_name = field.file_name().map(str::to_string);
                let data = field.bytes().await.map_err(multipart_read_error)?;
                if !data.is_empty() {
                    image = Some((data, file_name));
                }
            }
            _ => {}
        }
    }

    let uploaded = match image {
        Some((data, file_name)) => {
            Some(state.chat.upload(user, &data, file_name.as_deref()).await?)
        }
        None => None,
    };
    Ok((body, uploaded))
}

fn multipart_read_error(e: axum::extract::multipart::MultipartError) -> ServerError {
    ServerError::InvalidOperation(format!("Failed to read field: {e}"))
}

async fn clear_conversation(
    State(state): State<AppState>,
    Caller(user): Caller,
    Json(body): Json<ChatRequest>,
) -> Result<Json<MsgResponse>, ServerError> {
    state.chat.clear(body.chat_id, user).await?;
    Ok(Json(MsgResponse {
        msg: "Chat cleared successfully!",
    }))
}

async fn list_unseen(
    State(state): State<AppState>,
    Caller(user): Caller,
) -> Result<Json<UnseenResponse>, ServerError> {
    let unseen_messages = state.chat.unseen(user).await?;
    Ok(Json(UnseenResponse { unseen_messages }))
}

async fn mark_seen(
    State(state): State<AppState>,
    Caller(user): Caller,
    Json(body): Json<ChatRequest>,
) -> Result<Json<SeenResponse>, ServerError> {
    let updated = state.chat.mark_seen(body.chat_id, user).await?;
    Ok(Json(SeenResponse {
        msg: "Messages marked as seen successfully!",
        updated,
    }))
}

async fn delete_message(
    State(state): State<AppState>,
    Caller(user): Caller,
    Json(body): Json<DeleteMessageRequest>,
) -> Result<Json<MsgResponse>, ServerError> {
    state
        .chat
        .delete_message(body.chat_id, body.message_to_delete_id, user)
        .await?;
    Ok(Json(MsgResponse {
        msg: "Message deleted successfully!",
    }))
}

/// Store a file ahead of the message that will carry it. The returned
/// reference can be sent once, by the uploader, as `attachment`.
async fn upload_attachment(
    State(state): State<AppState>,
    Caller(user): Caller,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::InvalidOperation(format!("Multipart error: {e}")))?
    {
        if matches!(field.name(), Some("image" | "file")) {
            let file_name = field.file_name().map(str::to_string);
            let data = field.bytes().await.map_err(multipart_read_error)?;
            if data.is_empty() {
                break;
            }
            let attachment = state.chat.upload(user, &data, file_name.as_deref()).await?;
            info!(reference = %attachment, size = data.len(), "Attachment uploaded via API");
            return Ok(Json(UploadResponse {
                msg: "Attachment uploaded successfully!",
                attachment,
            }));
        }
    }

    Err(ServerError::InvalidOperation(
        "Missing 'image' field in multipart form".into(),
    ))
}

async fn download_attachment(
    State(state): State<AppState>,
    Caller(_user): Caller,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let data = state.chat.attachments().get(&reference).await?;
    Ok(([(header::CONTENT_TYPE, content_type_for(&reference))], data))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

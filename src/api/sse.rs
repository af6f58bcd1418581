//! SSE and JSON handlers
//!
//! ## Endpoints
//! - `GET /?topics=a.*,b.c&lastEventId=12` - SSE stream (replay, then live)
//! - `POST /` with `{"topic": "demo.ping", "data": {...}, "retain": false}`
//! - `GET /events?topics=...&lastEventId=...` - replay as a JSON array

use std::convert::Infallible;
use std::io;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event as SseEvent, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{HubError, HubResult};
use crate::hub::EventHub;
use crate::stream::StreamItem;
use crate::topic::parse_topics;
use crate::types::{Event, IngestRequest};

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            HubError::InvalidPayload(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            HubError::StoreUnavailable(e) => {
                tracing::error!(error = %e, "store unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, "store unavailable, retry later".to_string())
            }
            other => {
                tracing::error!(error = %other, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        (status, Json(json!({ "ok": false, "error": message }))).into_response()
    }
}

/// Query parameters shared by stream and replay
#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    /// Comma or whitespace separated patterns
    #[serde(default)]
    pub topics: Option<String>,
    /// Resume cursor; falls back to the `Last-Event-ID` header
    #[serde(default, rename = "lastEventId")]
    pub last_event_id: Option<String>,
}

impl StreamParams {
    fn patterns(&self) -> Vec<String> {
        parse_topics(self.topics.as_deref().unwrap_or(""))
    }
}

/// Resume id from the query string, else from `Last-Event-ID`
fn resume_id(headers: &HeaderMap, params: &StreamParams) -> HubResult<Option<u64>> {
    let raw = match params.last_event_id.as_deref() {
        Some(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => headers
            .get("last-event-id")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
    };

    raw.map(|v| {
        v.parse::<u64>()
            .map_err(|_| HubError::invalid_payload(format!("lastEventId must be an integer, got {:?}", v)))
    })
    .transpose()
}

/// SSE frame for one stream item
pub fn to_sse_event(item: &StreamItem) -> SseEvent {
    match item {
        StreamItem::Keepalive => SseEvent::default().comment("keepalive"),
        StreamItem::Event(event) => {
            let frame = SseEvent::default()
                .id(event.id.to_string())
                .data(event.payload().to_string());
            // `event:` must be a single line
            if event.topic.contains(['\n', '\r']) {
                frame
            } else {
                frame.event(&event.topic)
            }
        }
    }
}

/// GET / - SSE stream: replay since the resume id, then live events
pub async fn stream_handler(
    State(hub): State<Arc<EventHub>>,
    headers: HeaderMap,
    Query(params): Query<StreamParams>,
) -> Result<impl IntoResponse, HubError> {
    let patterns = params.patterns();
    let last_seen_id = resume_id(&headers, &params)?;

    let mut subscription = hub.subscribe(&patterns, last_seen_id);
    tracing::debug!(session = subscription.id(), ?patterns, ?last_seen_id, "sse client connected");

    // Dropping this stream (client gone) drops the subscription, which
    // cancels the session task.
    let stream = async_stream::stream! {
        while let Some(item) = subscription.recv().await {
            yield Ok::<_, Infallible>(to_sse_event(&item));
        }
    };

    let headers = [
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        (HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no")),
    ];

    Ok((headers, Sse::new(stream)))
}

/// POST / - append an event
pub async fn ingest_handler(
    State(hub): State<Arc<EventHub>>,
    body: Bytes,
) -> Result<Json<Value>, HubError> {
    let value: Value = serde_json::from_slice(&body)
        .map_err(|_| HubError::invalid_payload("require {topic, data?}"))?;
    let request = IngestRequest::from_value(value)?;

    // Append + fsync run on the blocking pool
    let id = tokio::task::spawn_blocking(move || hub.ingest_request(request))
        .await
        .map_err(|e| HubError::StoreUnavailable(io::Error::new(io::ErrorKind::Other, e.to_string())))??;

    Ok(Json(json!({ "ok": true, "id": id })))
}

/// GET /events - replay as JSON
pub async fn replay_handler(
    State(hub): State<Arc<EventHub>>,
    headers: HeaderMap,
    Query(params): Query<StreamParams>,
) -> Result<Json<Vec<Event>>, HubError> {
    let patterns = params.patterns();
    let last_seen_id = resume_id(&headers, &params)?;

    let events = tokio::task::spawn_blocking(move || hub.replay(&patterns, last_seen_id))
        .await
        .map_err(|e| HubError::StoreUnavailable(io::Error::new(io::ErrorKind::Other, e.to_string())))??;

    Ok(Json(events))
}

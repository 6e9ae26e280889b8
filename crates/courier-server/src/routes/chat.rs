use crate::error::{ApiError, EnvelopeResponse};
use crate::state::{ActiveSession, AppState};
use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use courier::dispatcher::{ChatStream, Completion, StreamPart, ToolEvent};
use courier::errors::{BrokerError, BrokerResult};
use courier::prompt::{normalize, RawSubmission};
use courier::providers::base::Usage;
use courier::tracker::ToolCallState;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::DropGuard;
use tracing::{debug, error, info, Instrument};

pub const THREAD_ID_HEADER: &str = "x-thread-id";

/// Streamed chat body in the Vercel AI data stream protocol.
/// Dropping it cancels the dispatch that feeds it.
pub struct SseResponse {
    rx: ReceiverStream<String>,
    thread_id: String,
    _cancel_on_drop: DropGuard,
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        let thread_id = HeaderValue::from_str(&self.thread_id).ok();
        let mut response = Body::from_stream(self).into_response();

        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert("x-vercel-ai-data-stream", HeaderValue::from_static("v1"));
        if let Some(thread_id) = thread_id {
            headers.insert(THREAD_ID_HEADER, thread_id);
        }
        response
    }
}

struct ProtocolFormatter;

impl ProtocolFormatter {
    fn format_text(text: &str) -> String {
        let encoded_text = serde_json::to_string(text).unwrap_or_default();
        format!("0:{}\n", encoded_text)
    }

    fn format_tool_call(id: &str, name: &str, args: &Value) -> String {
        let tool_call = json!({
            "toolCallId": id,
            "toolName": name,
            "args": args
        });
        format!("9:{}\n", tool_call)
    }

    fn format_tool_result(id: &str, result: &Value) -> String {
        let response = json!({
            "toolCallId": id,
            "result": result,
        });
        format!("a:{}\n", response)
    }

    fn format_finish(reason: &str, usage: &Usage) -> String {
        let finish = json!({
            "finishReason": reason,
            "usage": {
                "promptTokens": usage.input_tokens.unwrap_or(0),
                "completionTokens": usage.output_tokens.unwrap_or(0)
            }
        });
        format!("d:{}\n", finish)
    }

    fn format(part: &StreamPart) -> String {
        match part {
            StreamPart::Text(text) => Self::format_text(text),
            StreamPart::ToolCall {
                id,
                name,
                arguments,
            } => Self::format_tool_call(id, name, arguments),
            StreamPart::ToolResult { id, result } => Self::format_tool_result(id, result),
            StreamPart::Finish { reason, usage } => Self::format_finish(reason, usage),
        }
    }
}

async fn read_submission(mut multipart: Multipart) -> BrokerResult<RawSubmission> {
    let mut submission = RawSubmission::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| BrokerError::malformed(format!("unreadable form data: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let target = match name.as_str() {
            "content" => &mut submission.content,
            "image-base64" => &mut submission.image_base64,
            _ => continue,
        };
        let value = field
            .text()
            .await
            .map_err(|e| BrokerError::malformed(format!("unreadable field `{}`: {}", name, e)))?;
        *target = Some(value);
    }
    Ok(submission)
}

/// Forward the dispatch to the response body until it completes
async fn pump(
    state: AppState,
    session: ActiveSession,
    stream: ChatStream,
    tx: mpsc::Sender<String>,
) {
    let ChatStream {
        mut parts,
        events,
        completion,
    } = stream;

    let mut observer = session.tracker.subscribe();
    tokio::spawn(
        async move {
            while let Some(snapshot) = observer.changed().await {
                match snapshot.active {
                    Some(call) => info!(
                        tool = %call.name,
                        arguments = %call.arguments,
                        revision = snapshot.revision,
                        "tool call active"
                    ),
                    None => info!(revision = snapshot.revision, "tool call idle"),
                }
            }
        }
        .in_current_span(),
    );
    let events = tokio::spawn(
        events
            .for_each(|event| async move {
                match event {
                    ToolEvent::Started { id, name, .. } => debug!(%id, tool = %name, "tool started"),
                    ToolEvent::Finished { id, name, is_error } => {
                        debug!(%id, tool = %name, is_error, "tool finished")
                    }
                }
            })
            .in_current_span(),
    );

    while let Some(part) = parts.next().await {
        if tx.send(ProtocolFormatter::format(&part)).await.is_err() {
            session.cancel.cancel();
        }
    }

    match completion.await {
        Ok(Completion::Finished { reason }) => info!(%reason, "chat finished"),
        Ok(Completion::Cancelled) => info!("chat cancelled"),
        Ok(Completion::Failed) | Err(_) => error!("chat failed"),
    }
    let _ = events.await;
    state.sessions.finish(&session);
}

async fn handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<SseResponse, ApiError> {
    let prompt = normalize(read_submission(multipart).await?)?;
    let thread_id = prompt
        .thread_id()
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let span = tracing::info_span!("chat", thread_id = %thread_id);
    let session = state.sessions.start(&thread_id);

    let stream = match state
        .dispatcher
        .dispatch(prompt, session.cancel.clone(), session.tracker.clone())
        .instrument(span.clone())
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            state.sessions.finish(&session);
            return Err(e.into());
        }
    };

    let (tx, rx) = mpsc::channel(100);
    let cancel_on_drop = session.cancel.clone().drop_guard();
    tokio::spawn(pump(state.clone(), session, stream, tx).instrument(span));

    Ok(SseResponse {
        rx: ReceiverStream::new(rx),
        thread_id,
        _cancel_on_drop: cancel_on_drop,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelResponse {
    thread_id: String,
    cancelled: bool,
}

async fn cancel_handler(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> EnvelopeResponse<CancelResponse> {
    if !state.sessions.cancel(&thread_id) {
        return Err(BrokerError::not_found(format!(
            "No active chat for thread '{}'",
            thread_id
        )))
        .into();
    }
    info!(thread_id, "chat cancelled by request");
    Ok(CancelResponse {
        thread_id,
        cancelled: true,
    })
    .into()
}

async fn tool_call_handler(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> EnvelopeResponse<Option<ToolCallState>> {
    let current = state
        .sessions
        .tracker(&thread_id)
        .and_then(|tracker| tracker.current());
    Ok(current).into()
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(handler))
        .route("/chat/:thread_id/tool-call", get(tool_call_handler))
        .route("/chat/:thread_id/cancel", post(cancel_handler))
        .with_state(state)
}

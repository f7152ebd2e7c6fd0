//! WebSocket endpoints: terminal sessions and the file protocol.

use axum::{
    body::Bytes,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::handlers::{read_file, write_file, AppState, PathQuery};
use super::types::{FileRequest, FileResponse};
use crate::files::{client_message, FileOutcome};

/// Responses and notifications waiting to be written to one file client.
const OUTBOX_CAPACITY: usize = 256;

/// `GET /terminal`: one shell per connection.
pub async fn terminal_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| async move { state.bridge.run(socket).await })
}

/// `/files`: the persistent protocol when the request is an upgrade, the
/// single-shot REST calls otherwise.
pub async fn files_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
    method: Method,
    Query(query): Query<PathQuery>,
    body: Bytes,
) -> Response {
    if let Ok(ws) = ws {
        return ws.on_upgrade(move |socket| handle_file_socket(socket, state));
    }

    match method {
        Method::GET => read_file(&state, &query.path).await,
        Method::POST => write_file(&state, &query.path, body).await,
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

/// Serve one file connection until the client leaves or the daemon stops.
async fn handle_file_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (outbox, mut pending) = mpsc::channel::<FileResponse>(OUTBOX_CAPACITY);

    let subscription = match state.watcher.connect(outbox.clone()) {
        Ok(subscription) => subscription,
        Err(e) => {
            error!("Cannot register file connection: {}", e);
            return;
        }
    };
    debug!("File connection {} opened", subscription.id().as_u64());

    let writer = tokio::spawn(async move {
        while let Some(resp) = pending.recv().await {
            let json = match serde_json::to_string(&resp) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to encode file response: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        let msg = tokio::select! {
            msg = stream.next() => msg,
            _ = state.shutdown.cancelled() => break,
        };

        let request = match msg {
            Some(Ok(Message::Text(text))) => serde_json::from_str::<FileRequest>(text.as_str()),
            Some(Ok(Message::Binary(data))) => serde_json::from_slice::<FileRequest>(&data),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!("File socket read error: {}", e);
                break;
            }
        };

        let reply = match request {
            Ok(request) => match state.files.handle(request).await {
                FileOutcome::Respond(resp) => Some(resp),
                FileOutcome::Watch { dir, label } => {
                    let watched = subscription.watch(&dir, &label).await;
                    watched
                        .err()
                        .map(|e| FileResponse::error("watch", label, client_message(&e)))
                }
            },
            Err(e) => {
                debug!("Malformed file request: {}", e);
                Some(FileResponse::error("", "", "Invalid request"))
            }
        };

        if let Some(reply) = reply {
            if outbox.send(reply).await.is_err() {
                break;
            }
        }
    }

    debug!("File connection {} closed", subscription.id().as_u64());
    drop(subscription);
    drop(outbox);
    let _ = writer.await;
}

//! Live assignment feed for the back-office dashboard.
//!
//! Frames are JSON envelopes tagged by `type`: a `settings` snapshot on connect,
//! one `assignment` per delivered outbox event, and `lagged` when the client fell
//! behind the broadcast buffer and should reload the mission board.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::rest::extract::AdminPrincipal;
use crate::engine::settings::{self, AssignmentSettings};
use crate::models::assignment::AssignmentEvent;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum FeedFrame<'a> {
    Settings(&'a AssignmentSettings),
    Assignment(&'a AssignmentEvent),
    Lagged { skipped: u64 },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    AdminPrincipal(principal): AdminPrincipal,
) -> impl IntoResponse {
    let caller = principal.user_id;
    ws.on_upgrade(move |socket| stream_assignments(socket, state, caller))
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: &FeedFrame<'_>,
) -> Result<(), ()> {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(err) => {
            warn!(error = %err, "dropping unserializable feed frame");
            return Ok(());
        }
    };

    sink.send(Message::Text(text)).await.map_err(|_| ())
}

async fn stream_assignments(socket: WebSocket, state: Arc<AppState>, caller: String) {
    let (mut sink, mut inbound) = socket.split();
    let mut events = state.assignment_events_tx.subscribe();

    info!(caller = %caller, "assignment feed opened");

    let snapshot = settings::current(&state).await;
    if send_frame(&mut sink, &FeedFrame::Settings(&snapshot)).await.is_err() {
        return;
    }

    let outbound = tokio::spawn(async move {
        loop {
            let frame_result = match events.recv().await {
                Ok(event) => send_frame(&mut sink, &FeedFrame::Assignment(&event)).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "assignment feed lagging");
                    send_frame(&mut sink, &FeedFrame::Lagged { skipped }).await
                }
                Err(RecvError::Closed) => break,
            };

            if frame_result.is_err() {
                break;
            }
        }
    });

    // Inbound frames carry nothing; reading them notices the close.
    let closed = tokio::spawn(async move {
        while let Some(Ok(message)) = inbound.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
            debug!("ignoring inbound feed frame");
        }
    });

    join_first(outbound, closed).await;

    info!(caller = %caller, "assignment feed closed");
}

/// Waits for either task to end and aborts the other.
async fn join_first(mut first: JoinHandle<()>, mut second: JoinHandle<()>) {
    tokio::select! {
        _ = &mut first => second.abort(),
        _ = &mut second => first.abort(),
    }
}

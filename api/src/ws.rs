/// WebSocket progress stream.
///
/// Sends the current job record on connect and again on every change.
/// Closes after a terminal record, when the job is evicted, or when the
/// client goes away.
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use tokio::sync::watch;
use tracing::debug;

use vidfetch_shared::models::JobRecord;

use crate::routes::{ErrorBody, JOB_NOT_FOUND};
use crate::AppState;

/// The two directions of a progress connection.
#[async_trait]
pub trait ProgressSocket: Send {
    /// Returns false once the frame can no longer be delivered.
    async fn send_frame(&mut self, message: Message) -> bool;

    /// Next client message; `None` once the client closed or dropped.
    async fn next_incoming(&mut self) -> Option<Message>;
}

#[async_trait]
impl ProgressSocket for WebSocket {
    async fn send_frame(&mut self, message: Message) -> bool {
        self.send(message).await.is_ok()
    }

    async fn next_incoming(&mut self) -> Option<Message> {
        match self.recv().await {
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => None,
            Some(Ok(message)) => Some(message),
        }
    }
}

/// GET /ws/download-progress/:id
pub async fn download_progress_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let rx = state.store.subscribe(&id).await;
    ws.on_upgrade(move |mut socket| async move {
        stream_progress(&mut socket, &id, rx).await;
    })
}

/// Push job records to `socket` until the job ends or the client leaves.
pub async fn stream_progress<S: ProgressSocket>(
    socket: &mut S,
    id: &str,
    rx: Option<watch::Receiver<JobRecord>>,
) {
    let Some(mut rx) = rx else {
        socket.send_frame(Message::Text(not_found_frame())).await;
        socket.send_frame(Message::Close(None)).await;
        return;
    };

    debug!("WebSocket subscribed to job {}", id);

    let current = rx.borrow_and_update().clone();
    if !send_record(socket, &current).await || current.is_terminal() {
        socket.send_frame(Message::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    debug!("Job {} evicted, closing stream", id);
                    break;
                }
                let record = rx.borrow_and_update().clone();
                if !send_record(socket, &record).await || record.is_terminal() {
                    break;
                }
            }
            incoming = socket.next_incoming() => {
                if incoming.is_none() {
                    debug!("WebSocket client left job {}", id);
                    return;
                }
            }
        }
    }

    socket.send_frame(Message::Close(None)).await;
}

async fn send_record<S: ProgressSocket>(socket: &mut S, record: &JobRecord) -> bool {
    match record_frame(record) {
        Some(frame) => socket.send_frame(Message::Text(frame)).await,
        None => false,
    }
}

pub fn record_frame(record: &JobRecord) -> Option<String> {
    serde_json::to_string(record).ok()
}

pub fn not_found_frame() -> String {
    serde_json::to_string(&ErrorBody { detail: JOB_NOT_FOUND.to_string() }).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;
    use vidfetch_shared::events::JobEvent;
    use vidfetch_shared::job_store::JobStore;

    /// In-memory connection: frames sent by the server land in `outgoing`.
    struct ChannelSocket {
        outgoing: mpsc::UnboundedSender<Message>,
        incoming: mpsc::UnboundedReceiver<Message>,
    }

    #[async_trait]
    impl ProgressSocket for ChannelSocket {
        async fn send_frame(&mut self, message: Message) -> bool {
            self.outgoing.send(message).is_ok()
        }

        async fn next_incoming(&mut self) -> Option<Message> {
            match self.incoming.recv().await {
                Some(Message::Close(_)) | None => None,
                Some(message) => Some(message),
            }
        }
    }

    struct Client {
        frames: mpsc::UnboundedReceiver<Message>,
        to_server: mpsc::UnboundedSender<Message>,
        task: JoinHandle<()>,
    }

    impl Client {
        async fn next(&mut self) -> Message {
            tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
                .await
                .unwrap()
                .unwrap()
        }

        async fn next_json(&mut self) -> serde_json::Value {
            match self.next().await {
                Message::Text(text) => serde_json::from_str(&text).unwrap(),
                other => panic!("Expected text frame, got {:?}", other),
            }
        }

        async fn finished(self) {
            tokio::time::timeout(Duration::from_secs(5), self.task)
                .await
                .unwrap()
                .unwrap();
        }
    }

    fn connect(rx: Option<watch::Receiver<JobRecord>>) -> Client {
        let (outgoing, frames) = mpsc::unbounded_channel();
        let (to_server, incoming) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut socket = ChannelSocket { outgoing, incoming };
            stream_progress(&mut socket, "job", rx).await;
        });
        Client { frames, to_server, task }
    }

    fn progress(percent: &str) -> JobEvent {
        JobEvent::Progress {
            percent: percent.into(),
            speed: "1.00MiB/s".into(),
            eta: "00:05".into(),
            filename: "clip.webm".into(),
        }
    }

    #[test]
    fn test_frames() {
        let frame = record_frame(&JobRecord::starting()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["status"], "starting");
        assert_eq!(value["percent"], "0%");

        let value: serde_json::Value = serde_json::from_str(&not_found_frame()).unwrap();
        assert_eq!(value, serde_json::json!({"detail": "Download ID not found"}));
    }

    #[tokio::test]
    async fn test_unknown_job_gets_detail_then_close() {
        let mut client = connect(None);

        let value = client.next_json().await;
        assert_eq!(value, serde_json::json!({"detail": "Download ID not found"}));
        assert_eq!(client.next().await, Message::Close(None));
        client.finished().await;
    }

    #[tokio::test]
    async fn test_frame_per_change_until_terminal() {
        let store = JobStore::new();
        store.create("j1", "u", PathBuf::from("/tmp/j1")).await;
        let mut client = connect(store.subscribe("j1").await);

        assert_eq!(client.next_json().await["status"], "starting");

        store.apply("j1", progress("10.0%")).await;
        let value = client.next_json().await;
        assert_eq!(value["status"], "downloading");
        assert_eq!(value["percent"], "10.0%");

        store.apply("j1", progress("60.0%")).await;
        assert_eq!(client.next_json().await["percent"], "60.0%");

        store.apply("j1", JobEvent::Failed { message: "boom".into() }).await;
        let value = client.next_json().await;
        assert_eq!(value, serde_json::json!({"status": "error", "error": "boom"}));
        assert_eq!(client.next().await, Message::Close(None));
        client.finished().await;
    }

    #[tokio::test]
    async fn test_terminal_job_sends_one_frame() {
        let store = JobStore::new();
        store.create("j1", "u", PathBuf::from("/tmp/j1")).await;
        store.apply("j1", JobEvent::Finished { filepath: "/tmp/j1/a.mp4".into() }).await;
        let mut client = connect(store.subscribe("j1").await);

        let value = client.next_json().await;
        assert_eq!(value["status"], "finished");
        assert_eq!(value["filename"], "a.mp4");
        assert_eq!(client.next().await, Message::Close(None));
        client.finished().await;
    }

    #[tokio::test]
    async fn test_eviction_closes_stream() {
        let (tx, rx) = watch::channel(JobRecord::starting());
        let mut client = connect(Some(rx));

        assert_eq!(client.next_json().await["status"], "starting");
        drop(tx);
        assert_eq!(client.next().await, Message::Close(None));
        client.finished().await;
    }

    #[tokio::test]
    async fn test_client_leaving_ends_stream() {
        let store = JobStore::new();
        store.create("j1", "u", PathBuf::from("/tmp/j1")).await;
        let mut client = connect(store.subscribe("j1").await);

        assert_eq!(client.next_json().await["status"], "starting");
        client.to_server.send(Message::Ping(vec![1])).unwrap();
        client.to_server.send(Message::Close(None)).unwrap();
        client.finished().await;
    }
}

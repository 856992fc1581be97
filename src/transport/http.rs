//! HTTP long-poll transport.
//!
//! Connect fetches the log backfill from the resume cursor, then a
//! long-poll loop streams decoded events until the session drops its end
//! of the channel. Outbound signals go through a separate POST loop.

use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use async_trait::async_trait;

use super::traits::{
    ActorIdentity, ConversationId, Cursor, InboundEvent, Message, OutboundSignal, Transport,
    TransportError, TransportEvent, TransportSession,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// Default server-side hold time for a long-poll request, in seconds.
const DEFAULT_POLL_WAIT_SECS: u64 = 25;

/// Wire shape of `GET /conversations/{id}/log`.
#[derive(Debug, Deserialize)]
struct LogPage {
    cursor: u64,
    events: Vec<serde_json::Value>,
}

/// Long-poll HTTP transport against a conversation log endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    poll_wait_secs: u64,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            poll_wait_secs: DEFAULT_POLL_WAIT_SECS,
        }
    }

    pub fn poll_wait_secs(mut self, secs: u64) -> Self {
        self.poll_wait_secs = secs;
        self
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn authed(req: RequestBuilder, actor: &ActorIdentity) -> RequestBuilder {
    match &actor.bearer_token {
        Some(token) => req.bearer_auth(token),
        None => req,
    }
}

fn status_error(status: StatusCode) -> TransportError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        TransportError::AuthExpired
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        TransportError::RateLimited
    } else if status.is_server_error() {
        TransportError::ServerError(format!("http {}", status.as_u16()))
    } else {
        TransportError::Network(format!("unexpected http {}", status.as_u16()))
    }
}

fn request_error(err: &reqwest::Error) -> TransportError {
    TransportError::Network(err.to_string())
}

/// Decode raw event payloads, dropping malformed ones. A bad event never
/// takes the stream down.
fn decode_events(raw: Vec<serde_json::Value>) -> Vec<InboundEvent> {
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value::<InboundEvent>(value) {
            Ok(event) => Some(event),
            Err(err) => {
                warn!(error = %err, "dropping malformed inbound event");
                None
            }
        })
        .collect()
}

async fn fetch_log(
    client: &reqwest::Client,
    log_url: &str,
    actor: &ActorIdentity,
    cursor: Option<Cursor>,
    wait_secs: Option<u64>,
) -> Result<LogPage, TransportError> {
    let mut req = authed(client.get(log_url), actor);
    if let Some(cursor) = cursor {
        req = req.query(&[("cursor", cursor.0.to_string())]);
    }
    if let Some(wait) = wait_secs {
        req = req.query(&[("wait", wait.to_string())]);
    }
    let resp = req.send().await.map_err(|e| request_error(&e))?;
    if !resp.status().is_success() {
        return Err(status_error(resp.status()));
    }
    resp.json::<LogPage>()
        .await
        .map_err(|e| TransportError::Network(e.to_string()))
}

async fn poll_loop(
    client: reqwest::Client,
    log_url: String,
    actor: ActorIdentity,
    mut cursor: u64,
    wait_secs: u64,
    tx: mpsc::Sender<TransportEvent>,
) {
    loop {
        let page = tokio::select! {
            // The session hung up; stop polling.
            () = tx.closed() => break,
            page = fetch_log(&client, &log_url, &actor, Some(Cursor(cursor)), Some(wait_secs)) => page,
        };
        match page {
            Ok(page) => {
                cursor = cursor.max(page.cursor);
                for event in decode_events(page.events) {
                    if tx.send(TransportEvent::Event(event)).await.is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                debug!(error = %err, "long-poll stream dropped");
                let _ = tx.send(TransportEvent::Dropped(err)).await;
                return;
            }
        }
    }
}

async fn outbound_loop(
    client: reqwest::Client,
    signal_url: String,
    actor: ActorIdentity,
    mut rx: mpsc::Receiver<OutboundSignal>,
) {
    while let Some(signal) = rx.recv().await {
        let req = authed(client.post(&signal_url), &actor).json(&signal);
        match req.send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!(status = %resp.status(), "outbound signal rejected"),
            Err(err) => warn!(error = %err, "outbound signal failed"),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(
        &self,
        endpoint: &str,
        conversation_id: &ConversationId,
        actor: &ActorIdentity,
        resume_cursor: Option<Cursor>,
    ) -> Result<TransportSession, TransportError> {
        let base = format!(
            "{}/conversations/{}",
            endpoint.trim_end_matches('/'),
            conversation_id
        );
        let log_url = format!("{base}/log");
        let signal_url = format!("{base}/signals");

        let page = fetch_log(&self.client, &log_url, actor, resume_cursor, None).await?;
        let cursor = page.cursor;
        let backfill: Vec<Message> = decode_events(page.events)
            .into_iter()
            .filter_map(|event| match event {
                InboundEvent::MessageCreated { message, .. } => Some(message),
                _ => None,
            })
            .collect();

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);

        tokio::spawn(poll_loop(
            self.client.clone(),
            log_url,
            actor.clone(),
            cursor,
            self.poll_wait_secs,
            event_tx,
        ));
        tokio::spawn(outbound_loop(
            self.client.clone(),
            signal_url,
            actor.clone(),
            outbound_rx,
        ));

        Ok(TransportSession {
            backfill,
            cursor: Cursor(cursor),
            events: event_rx,
            outbound: outbound_tx,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unauthorized_maps_to_auth_expired() {
        assert_eq!(
            status_error(StatusCode::UNAUTHORIZED),
            TransportError::AuthExpired
        );
        assert_eq!(
            status_error(StatusCode::FORBIDDEN),
            TransportError::AuthExpired
        );
    }

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        assert_eq!(
            status_error(StatusCode::TOO_MANY_REQUESTS),
            TransportError::RateLimited
        );
        let err = status_error(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err, TransportError::ServerError("http 500".to_string()));
        assert!(err.is_retryable());
    }

    #[test]
    fn decode_skips_malformed_events() {
        let raw = vec![
            json!({
                "type": "typing",
                "conversation_id": "c1",
                "actor_id": "bob",
                "active": true
            }),
            json!({"type": "no_such_event"}),
            json!("not even an object"),
            json!({
                "type": "read_receipt",
                "conversation_id": "c1",
                "actor_id": "bob",
                "seq": 4
            }),
        ];
        let events = decode_events(raw);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], InboundEvent::Typing { .. }));
        assert!(matches!(events[1], InboundEvent::ReadReceipt { .. }));
    }

    #[test]
    fn log_page_decodes_wire_shape() {
        let page: LogPage = serde_json::from_value(json!({
            "cursor": 7,
            "events": [{"type": "typing", "conversation_id": "c1", "actor_id": "bob", "active": false}]
        }))
        .unwrap();
        assert_eq!(page.cursor, 7);
        assert_eq!(page.events.len(), 1);
    }
}

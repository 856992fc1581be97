//! Wire contract between a conversation session and the remote service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Opaque stable identifier for a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned message identifier. Dedup in the session log keys on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-issued stream position. Resuming from a cursor must not redeliver
/// events the client already acknowledged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor(pub u64);

/// The local user the session acts as. Fixed at session construction; token
/// refresh is the authentication collaborator's job, not ours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorIdentity {
    pub actor_id: String,
    pub bearer_token: Option<String>,
}

impl ActorIdentity {
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            bearer_token: None,
        }
    }

    pub fn with_token(actor_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            bearer_token: Some(token.into()),
        }
    }
}

/// One message in a conversation log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub seq: u64,
    pub sender: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// Inbound server events. Every event names the conversation it belongs to
/// so the router can dispatch it without any ambient context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    MessageCreated {
        conversation_id: ConversationId,
        message: Message,
    },
    ReadReceipt {
        conversation_id: ConversationId,
        actor_id: String,
        seq: u64,
    },
    Typing {
        conversation_id: ConversationId,
        actor_id: String,
        active: bool,
    },
}

impl InboundEvent {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::MessageCreated {
                conversation_id, ..
            }
            | Self::ReadReceipt {
                conversation_id, ..
            }
            | Self::Typing {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

/// Outbound signals from the local client. Sends carry a client-generated
/// idempotency key so a retried send cannot duplicate server-side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundSignal {
    SendMessage { idempotency_key: Uuid, text: String },
    Typing { active: bool },
    ReadReceipt { seq: u64 },
}

/// Why a transport operation failed. Everything except an expired
/// credential is retryable with backoff.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("authentication expired")]
    AuthExpired,
    #[error("rate limited by server")]
    RateLimited,
    #[error("server error: {0}")]
    ServerError(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::AuthExpired)
    }
}

/// Inbound side of an established connection.
#[derive(Debug)]
pub enum TransportEvent {
    Event(InboundEvent),
    /// The stream died; the state machine schedules a reconnect.
    Dropped(TransportError),
}

/// An established connection for one conversation. Dropping the event
/// receiver and the outbound sender closes the connection.
pub struct TransportSession {
    /// Messages since the resume cursor, or the full history on a fresh
    /// connect. In sequence order.
    pub backfill: Vec<Message>,
    /// Server position after the backfill.
    pub cursor: Cursor,
    /// Live inbound stream. A closed channel or a `Dropped` item means the
    /// connection is gone.
    pub events: mpsc::Receiver<TransportEvent>,
    /// Outbound sends: messages, typing, read receipts.
    pub outbound: mpsc::Sender<OutboundSignal>,
}

/// Connection factory for one remote service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a connection for one conversation. A `resume_cursor` of
    /// `None` requests the full history.
    async fn connect(
        &self,
        endpoint: &str,
        conversation_id: &ConversationId,
        actor: &ActorIdentity,
        resume_cursor: Option<Cursor>,
    ) -> Result<TransportSession, TransportError>;

    /// The name of this transport implementation.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_message(id: &str, seq: u64) -> Message {
        Message {
            id: MessageId::new(id),
            seq,
            sender: "alice".to_string(),
            text: "hi".to_string(),
            sent_at: Utc::now(),
        }
    }

    #[test]
    fn every_event_names_its_conversation() {
        let convo = ConversationId::new("c1");
        let events = vec![
            InboundEvent::MessageCreated {
                conversation_id: convo.clone(),
                message: test_message("m1", 1),
            },
            InboundEvent::ReadReceipt {
                conversation_id: convo.clone(),
                actor_id: "bob".to_string(),
                seq: 1,
            },
            InboundEvent::Typing {
                conversation_id: convo.clone(),
                actor_id: "bob".to_string(),
                active: true,
            },
        ];
        for event in events {
            assert_eq!(event.conversation_id(), &convo);
        }
    }

    #[test]
    fn auth_expired_is_the_only_fatal_error() {
        assert!(TransportError::Network("refused".to_string()).is_retryable());
        assert!(TransportError::RateLimited.is_retryable());
        assert!(TransportError::ServerError("500".to_string()).is_retryable());
        assert!(!TransportError::AuthExpired.is_retryable());
    }

    #[test]
    fn inbound_event_decodes_from_tagged_json() {
        let raw = r#"{
            "type": "typing",
            "conversation_id": "c1",
            "actor_id": "bob",
            "active": true
        }"#;
        let event: InboundEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            event,
            InboundEvent::Typing {
                conversation_id: ConversationId::new("c1"),
                actor_id: "bob".to_string(),
                active: true,
            }
        );
    }

    #[test]
    fn outbound_send_serializes_idempotency_key() {
        let signal = OutboundSignal::SendMessage {
            idempotency_key: Uuid::new_v4(),
            text: "hello".to_string(),
        };
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["type"], "send_message");
        assert!(json["idempotency_key"].is_string());
    }
}

//! Transport layer: the wire contract and the HTTP long-poll implementation.

pub mod http;
pub mod traits;

pub use http::HttpTransport;
pub use traits::{
    ActorIdentity, ConversationId, Cursor, InboundEvent, Message, MessageId, OutboundSignal,
    Transport, TransportError, TransportEvent, TransportSession,
};

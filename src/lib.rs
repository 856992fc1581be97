#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::uninlined_format_args
)]

//! Per-conversation live sync sessions for chat clients.
//!
//! A [`session::ConvoSession`] owns the sync relationship between the local
//! client and the remote service for one conversation: it connects and
//! reconnects with jittered backoff, merges inbound events into an ordered,
//! deduplicated log, and publishes every state change as an immutable
//! snapshot. The [`router::EventRouter`] fans inbound events out to the
//! live session for their conversation, and the
//! [`lifecycle::LifecycleBinder`] maps the host's foreground and
//! screen-focus signals onto `resume`/`background` calls.

pub mod config;
pub mod lifecycle;
pub mod router;
pub mod session;
pub mod snapshot;
pub mod transport;

pub use config::{SessionConfig, SessionTuning};
pub use lifecycle::{HostSignal, LifecycleBinder};
pub use router::EventRouter;
pub use session::{ConvoSession, ConvoState, SessionControl, SessionError};
pub use snapshot::{SnapshotStore, Subscription};
pub use transport::{
    ActorIdentity, ConversationId, Cursor, HttpTransport, InboundEvent, Message, MessageId,
    OutboundSignal, Transport, TransportError, TransportEvent, TransportSession,
};

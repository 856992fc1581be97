//! Conversation-keyed dispatch of inbound events.
//!
//! One router instance serves the whole client. Sessions register
//! themselves while live and unregister on background; events for
//! conversations with no live session are dropped, because the session
//! will backfill from its cursor on the next connect anyway.

use std::collections::HashMap;
use std::sync::Weak;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::session::ConvoSession;
use crate::transport::{ConversationId, InboundEvent};

#[derive(Default)]
pub struct EventRouter {
    routes: Mutex<HashMap<ConversationId, Weak<ConvoSession>>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently registered routes. Dead entries count until
    /// their session unregisters.
    pub fn route_count(&self) -> usize {
        self.routes.lock().len()
    }

    pub(crate) fn register(&self, conversation_id: ConversationId, session: Weak<ConvoSession>) {
        debug!(conversation = %conversation_id, "route registered");
        self.routes.lock().insert(conversation_id, session);
    }

    /// Remove a route only while it still points at `session`. A newer
    /// session registered for the same conversation wins over an older
    /// session's teardown.
    pub(crate) fn unregister(&self, conversation_id: &ConversationId, session: &Weak<ConvoSession>) {
        let mut routes = self.routes.lock();
        if let Some(current) = routes.get(conversation_id) {
            if Weak::ptr_eq(current, session) {
                debug!(conversation = %conversation_id, "route removed");
                routes.remove(conversation_id);
            }
        }
    }

    /// Dispatch one inbound event to the session registered for its
    /// conversation, if any.
    pub fn deliver(&self, event: InboundEvent) {
        // Take the target out of the table before touching the session, so
        // no session lock is ever acquired while the route table is held.
        let target = self.routes.lock().get(event.conversation_id()).cloned();
        match target.and_then(|session| session.upgrade()) {
            Some(session) => session.apply_inbound(event),
            None => {
                trace!(
                    conversation = %event.conversation_id(),
                    "event for unrouted conversation dropped"
                );
            }
        }
    }
}

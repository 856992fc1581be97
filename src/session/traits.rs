//! Control seam between lifecycle policy and a running session.

use super::SessionError;

/// The resume/background surface the lifecycle binder drives. Split out as
/// a trait so the binder's policy can be tested against a recording stub.
pub trait SessionControl: Send + Sync {
    /// Bring the session live. Idempotent; a no-op while connecting or
    /// ready.
    fn resume(&self) -> Result<(), SessionError>;

    /// Tear down all network activity. Idempotent.
    fn background(&self) -> Result<(), SessionError>;
}

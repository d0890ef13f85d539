//! Collaborator seams consumed by the lifecycle controller.

use parlor_models::ChatEvent;

/// What a visitor is trying to do, for rate-limit bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Knock,
    Message,
}

/// Pass/fail gate in front of visitor input.
///
/// Rate limiting and validation live in their own module outside this
/// crate; the controller only consumes the verdicts.
pub trait AdmissionGate: Send + Sync {
    /// Returns true if the source is within its rate budget.
    fn check_rate(&self, key: &str, kind: ActionKind) -> bool;

    /// Returns true if the text is acceptable visitor input.
    fn validate_text(&self, text: &str) -> bool;
}

/// Gate that admits everything non-degenerate. Default wiring and
/// test double.
pub struct OpenGate;

impl AdmissionGate for OpenGate {
    fn check_rate(&self, _key: &str, _kind: ActionKind) -> bool {
        true
    }

    fn validate_text(&self, text: &str) -> bool {
        let trimmed = text.trim();
        !trimmed.is_empty() && trimmed.len() <= 2000
    }
}

/// Handle to a visitor's live connection, owned by the transport
/// layer. Delivery is fire-and-forget; the transport buffers or drops
/// as it sees fit.
pub trait VisitorSink: Send + Sync {
    /// Pushes a chat event to the visitor.
    fn deliver(&self, event: &ChatEvent);

    /// Tells the visitor the conversation is over.
    fn close(&self, reason: &str);
}

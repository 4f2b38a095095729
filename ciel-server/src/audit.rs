//! Audit trail events
//!
//! Authentication-sensitive operations emit structured audit records through
//! the tracing pipeline. Failures log at warn, successes at info, both with a
//! stable `event` field so log queries stay schema-free.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit event names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEvent {
    /// Login finish (success or failure)
    Login,
    /// All-session revocation
    LogoutAll,
    /// Password change
    PasswordChange,
    /// Step-up token consumption
    StepupUse,
}

impl AuditEvent {
    /// Stable dotted name used in the log stream
    pub fn name(&self) -> &'static str {
        match self {
            AuditEvent::Login => "auth.login",
            AuditEvent::LogoutAll => "auth.logout_all",
            AuditEvent::PasswordChange => "auth.password_change",
            AuditEvent::StepupUse => "auth.stepup.use",
        }
    }
}

/// Outcome of an audited operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

/// Emit a successful audit record
pub fn success(event: AuditEvent, user_id: Option<Uuid>, action: Option<&str>) {
    let user_id = user_id.map(|u| u.to_string());
    tracing::info!(
        event = event.name(),
        outcome = Outcome::Success.as_str(),
        user_id = user_id.as_deref(),
        action = action,
        "audit"
    );
}

/// Emit a failed audit record with a free-form reason
///
/// The reason stays in the log stream; it must never be echoed to the client.
pub fn failure(event: AuditEvent, user_id: Option<Uuid>, action: Option<&str>, reason: &str) {
    let user_id = user_id.map(|u| u.to_string());
    tracing::warn!(
        event = event.name(),
        outcome = Outcome::Failure.as_str(),
        user_id = user_id.as_deref(),
        action = action,
        reason = reason,
        "audit"
    );
}

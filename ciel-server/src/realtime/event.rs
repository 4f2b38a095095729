//! Realtime event types and the cross-instance wire envelope
//!
//! Each server→client message is a JSON object with a `type` field plus
//! exactly one of `post`, `postId`, or `reactionCounts`. Events are validated
//! at the publish boundary so malformed payloads never enter the hub queue.
//!
//! When a signing secret is configured, cross-instance payloads travel as
//! `{"payload": <event json>, "sig": <base64url hmac>}`; deliveries whose
//! signature does not verify are dropped without comment.

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use uuid::Uuid;

use crate::auth::scram::{constant_time_eq, hmac_sha256};
use crate::error::{Error, Result};
use crate::store::{PostView, ReactionCount};

/// Largest cross-instance payload we will accept (1 MiB)
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Reaction counts as carried in a `reaction_updated` event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionCounts {
    pub post_id: Uuid,
    pub counts: Vec<ReactionCount>,
}

/// A timeline event, fanned out to every attached client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineEvent {
    PostCreated {
        post: PostView,
    },
    PostDeleted {
        #[serde(rename = "postId")]
        post_id: Uuid,
    },
    ReactionUpdated {
        #[serde(rename = "reactionCounts")]
        reaction_counts: ReactionCounts,
    },
}

impl TimelineEvent {
    /// Validate required fields before the event may be enqueued
    pub fn validate(&self) -> Result<()> {
        match self {
            TimelineEvent::PostCreated { post } => {
                if post.id.is_nil() || post.author.username.is_empty() {
                    return Err(Error::InvalidRequest(
                        "post_created event missing post identity".to_string(),
                    ));
                }
            }
            TimelineEvent::PostDeleted { post_id } => {
                if post_id.is_nil() {
                    return Err(Error::InvalidRequest(
                        "post_deleted event missing post id".to_string(),
                    ));
                }
            }
            TimelineEvent::ReactionUpdated { reaction_counts } => {
                if reaction_counts.post_id.is_nil() {
                    return Err(Error::InvalidRequest(
                        "reaction_updated event missing post id".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Signed cross-instance envelope
#[derive(Debug, Serialize, Deserialize)]
struct SignedEnvelope<'a> {
    #[serde(borrow)]
    payload: &'a RawValue,
    sig: String,
}

/// Serialize an event for the shared channel, signing when a secret is set
pub fn seal(event: &TimelineEvent, secret: Option<&[u8]>) -> Result<String> {
    let payload = serde_json::to_string(event)
        .map_err(|e| Error::Internal(format!("event serialize: {}", e)))?;

    let Some(secret) = secret else {
        return Ok(payload);
    };

    let sig = BASE64_URL_SAFE_NO_PAD.encode(hmac_sha256(secret, payload.as_bytes()));
    let raw = RawValue::from_string(payload)
        .map_err(|e| Error::Internal(format!("event payload: {}", e)))?;
    let envelope = SignedEnvelope {
        payload: &raw,
        sig,
    };
    serde_json::to_string(&envelope)
        .map_err(|e| Error::Internal(format!("envelope serialize: {}", e)))
}

/// Decode a delivery from the shared channel
///
/// Oversize payloads, signature failures, and malformed events all return
/// `None`: dropped silently, per the fan-out's best-effort contract.
pub fn open(raw: &str, secret: Option<&[u8]>) -> Option<TimelineEvent> {
    if raw.len() > MAX_PAYLOAD_BYTES {
        tracing::debug!(bytes = raw.len(), "dropping oversize realtime payload");
        return None;
    }

    let payload = match secret {
        None => raw,
        Some(secret) => {
            let envelope: SignedEnvelope<'_> = serde_json::from_str(raw).ok()?;
            let sig = BASE64_URL_SAFE_NO_PAD.decode(&envelope.sig).ok()?;
            let expected = hmac_sha256(secret, envelope.payload.get().as_bytes());
            if !constant_time_eq(&sig, &expected) {
                tracing::debug!("dropping realtime payload with bad signature");
                return None;
            }
            envelope.payload.get()
        }
    };

    let event: TimelineEvent = serde_json::from_str(payload).ok()?;
    event.validate().ok()?;
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::UserRef;
    use chrono::Utc;

    fn post() -> PostView {
        PostView {
            id: Uuid::new_v4(),
            author: UserRef {
                id: Uuid::new_v4(),
                username: "alice".to_string(),
            },
            content: "hello".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn wire_shape_has_type_plus_one_field() {
        let event = TimelineEvent::PostDeleted {
            post_id: Uuid::new_v4(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "post_deleted");
        assert!(json.get("postId").is_some());
        assert_eq!(json.as_object().unwrap().len(), 2);

        let event = TimelineEvent::PostCreated { post: post() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "post_created");
        assert!(json.get("post").is_some());

        let event = TimelineEvent::ReactionUpdated {
            reaction_counts: ReactionCounts {
                post_id: Uuid::new_v4(),
                counts: vec![],
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "reaction_updated");
        assert!(json.get("reactionCounts").is_some());
    }

    #[test]
    fn validation_rejects_missing_identity() {
        let event = TimelineEvent::PostDeleted { post_id: Uuid::nil() };
        assert!(event.validate().is_err());

        let mut bad_post = post();
        bad_post.author.username.clear();
        assert!(TimelineEvent::PostCreated { post: bad_post }.validate().is_err());

        assert!(TimelineEvent::PostDeleted {
            post_id: Uuid::new_v4()
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn unsigned_round_trip() {
        let event = TimelineEvent::PostDeleted {
            post_id: Uuid::new_v4(),
        };
        let wire = seal(&event, None).unwrap();
        let back = open(&wire, None).expect("payload should decode");
        assert!(matches!(back, TimelineEvent::PostDeleted { .. }));
    }

    #[test]
    fn signed_round_trip_and_tamper_rejection() {
        let secret = b"hub-signing-secret";
        let event = TimelineEvent::PostDeleted {
            post_id: Uuid::new_v4(),
        };

        let wire = seal(&event, Some(secret)).unwrap();
        assert!(wire.contains("\"sig\""));
        assert!(open(&wire, Some(secret)).is_some());

        // Signature from a different secret is dropped.
        assert!(open(&wire, Some(b"other-secret")).is_none());

        // Tampered payload is dropped.
        let tampered = wire.replace("post_deleted", "post_created");
        assert!(open(&tampered, Some(secret)).is_none());
    }

    #[test]
    fn unsigned_delivery_is_dropped_when_signing_enabled() {
        let event = TimelineEvent::PostDeleted {
            post_id: Uuid::new_v4(),
        };
        let bare = seal(&event, None).unwrap();
        assert!(open(&bare, Some(b"secret")).is_none());
    }

    #[test]
    fn oversize_payload_is_dropped() {
        let huge = format!(
            "{{\"type\":\"post_deleted\",\"postId\":\"{}\",\"pad\":\"{}\"}}",
            Uuid::new_v4(),
            "x".repeat(MAX_PAYLOAD_BYTES)
        );
        assert!(open(&huge, None).is_none());
    }

    #[test]
    fn malformed_deliveries_are_dropped() {
        assert!(open("", None).is_none());
        assert!(open("not json", None).is_none());
        assert!(open("{\"type\":\"unknown\"}", None).is_none());
        // Valid JSON but fails publish-boundary validation
        let nil = format!("{{\"type\":\"post_deleted\",\"postId\":\"{}\"}}", Uuid::nil());
        assert!(open(&nil, None).is_none());
    }
}

//! Opaque pagination cursors
//!
//! A cursor is base64url over `{"s": <score-ms>, "i": "<uuid>"}` and points
//! strictly past the last item a page returned: score is the item's ordering
//! timestamp in milliseconds, id breaks ties. Decoding validates both fields
//! so a cursor can never smuggle malformed input into a query.

use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Position strictly past the last returned item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// Ordering timestamp in milliseconds; never negative
    pub score: i64,
    /// Tie-breaking item id
    pub id: Uuid,
}

#[derive(Serialize, Deserialize)]
struct Wire {
    s: i64,
    i: String,
}

impl Cursor {
    pub fn new(score: i64, id: Uuid) -> Self {
        Self { score, id }
    }

    /// Encode to the opaque wire form
    pub fn encode(&self) -> String {
        let wire = Wire {
            s: self.score,
            i: self.id.to_string(),
        };
        // Serialization of two plain fields cannot fail.
        let json = serde_json::to_vec(&wire).expect("cursor serialization");
        BASE64_URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode and validate a wire cursor
    pub fn decode(raw: &str) -> Result<Self> {
        let bytes = BASE64_URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|_| Error::InvalidRequest("malformed cursor".to_string()))?;
        let wire: Wire = serde_json::from_slice(&bytes)
            .map_err(|_| Error::InvalidRequest("malformed cursor".to_string()))?;

        if wire.s < 0 {
            return Err(Error::InvalidRequest("malformed cursor".to_string()));
        }
        let id = Uuid::parse_str(&wire.i)
            .map_err(|_| Error::InvalidRequest("malformed cursor".to_string()))?;

        Ok(Self { score: wire.s, id })
    }

    /// The cursor's score as a UTC timestamp
    pub fn timestamp(&self) -> Result<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.score)
            .ok_or_else(|| Error::InvalidRequest("malformed cursor".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let cursor = Cursor::new(1_700_000_000_123, Uuid::new_v4());
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn zero_score_round_trips() {
        let cursor = Cursor::new(0, Uuid::nil());
        assert_eq!(Cursor::decode(&cursor.encode()).unwrap(), cursor);
    }

    #[test]
    fn negative_score_is_rejected() {
        let wire = serde_json::json!({"s": -1, "i": Uuid::new_v4().to_string()});
        let raw = BASE64_URL_SAFE_NO_PAD.encode(wire.to_string());
        assert!(matches!(
            Cursor::decode(&raw),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn non_uuid_id_is_rejected() {
        let wire = serde_json::json!({"s": 1000, "i": "not-a-uuid"});
        let raw = BASE64_URL_SAFE_NO_PAD.encode(wire.to_string());
        assert!(matches!(
            Cursor::decode(&raw),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn garbage_input_is_rejected() {
        assert!(Cursor::decode("").is_err());
        assert!(Cursor::decode("!!!").is_err());
        assert!(Cursor::decode(&BASE64_URL_SAFE_NO_PAD.encode("not json")).is_err());
        // Standard-alphabet base64 with padding is not a valid url-safe cursor
        assert!(Cursor::decode("eyJzIjogMX0=").is_err());
    }

    #[test]
    fn timestamp_conversion() {
        let cursor = Cursor::new(1_700_000_000_000, Uuid::nil());
        let ts = cursor.timestamp().unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_000);
    }
}

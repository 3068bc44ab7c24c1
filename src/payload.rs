//! Work item payload encoding.
//!
//! Payloads are MessagePack-encoded structs, one variant per payload type.
//! The `payload_type` column on the work item row selects the decoder; the
//! bytes themselves are opaque to the queue.

use serde::{Deserialize, Serialize};

use crate::db::models::{BoundingBox, PayloadType};
use crate::error::{Error, Result};

/// Hard bound on a single encoded payload.
pub const MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Parameters for one keyword search (optionally narrowed to one grid tile).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchTask {
    pub keyword: String,
    pub lang: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub zoom: i32,
    pub radius: i32,
    pub depth: i32,
    pub fast_mode: bool,
    pub extract_email: bool,
    pub max_time_seconds: u64,
    #[serde(default)]
    pub proxies: Vec<String>,
    /// Set when the parent job runs in area-coverage mode; the search is
    /// constrained to this tile of the job's bounding box.
    pub tile: Option<BoundingBox>,
}

/// Parameters for scraping a single known place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceTask {
    pub place_id: String,
    pub lang: String,
    pub extract_email: bool,
}

/// Parameters for extracting emails from a listing's website.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailTask {
    pub listing_id: i64,
    pub website: String,
    pub max_depth: i32,
}

/// Tagged union over everything a work item can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskPayload {
    Search(SearchTask),
    Place(PlaceTask),
    Email(EmailTask),
}

impl TaskPayload {
    /// The discriminator stored alongside the encoded bytes.
    pub fn kind(&self) -> PayloadType {
        match self {
            Self::Search(_) => PayloadType::Search,
            Self::Place(_) => PayloadType::Place,
            Self::Email(_) => PayloadType::Email,
        }
    }

    /// Encode to MessagePack, enforcing the size bound.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            Self::Search(t) => rmp_serde::to_vec_named(t),
            Self::Place(t) => rmp_serde::to_vec_named(t),
            Self::Email(t) => rmp_serde::to_vec_named(t),
        }
        .map_err(|e| Error::Payload(e.to_string()))?;

        if bytes.len() > MAX_PAYLOAD_BYTES {
            return Err(Error::Payload(format!(
                "encoded payload is {} bytes, limit is {MAX_PAYLOAD_BYTES}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Decode bytes using the decoder selected by `kind`.
    pub fn decode(kind: PayloadType, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_PAYLOAD_BYTES {
            return Err(Error::Payload(format!(
                "payload is {} bytes, limit is {MAX_PAYLOAD_BYTES}",
                bytes.len()
            )));
        }
        let payload = match kind {
            PayloadType::Search => Self::Search(
                rmp_serde::from_slice(bytes).map_err(|e| Error::Payload(e.to_string()))?,
            ),
            PayloadType::Place => Self::Place(
                rmp_serde::from_slice(bytes).map_err(|e| Error::Payload(e.to_string()))?,
            ),
            PayloadType::Email => Self::Email(
                rmp_serde::from_slice(bytes).map_err(|e| Error::Payload(e.to_string()))?,
            ),
        };
        Ok(payload)
    }
}

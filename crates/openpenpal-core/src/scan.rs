//! Scan events: the append-only, per-barcode timeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::letter::BarcodeStatus;
use crate::opcode::OpCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    Bind,
    Pickup,
    Transit,
    Deliver,
    Fail,
    Cancel,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bind => "bind",
            Self::Pickup => "pickup",
            Self::Transit => "transit",
            Self::Deliver => "deliver",
            Self::Fail => "fail",
            Self::Cancel => "cancel",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bind" => Some(Self::Bind),
            "pickup" => Some(Self::Pickup),
            "transit" => Some(Self::Transit),
            "deliver" => Some(Self::Deliver),
            "fail" => Some(Self::Fail),
            "cancel" => Some(Self::Cancel),
            _ => None,
        }
    }

    /// The canonical state graph. Deliver and fail are legal from both
    /// `picked` and `in_transit` (a building-level run has no separate
    /// transit leg). Cancel is an admin scan from any live state.
    pub fn transition(&self, from: BarcodeStatus) -> Result<BarcodeStatus, CoreError> {
        use BarcodeStatus::*;
        let next = match (self, from) {
            (Self::Bind, Unused) => Bound,
            (Self::Pickup, Bound) => Picked,
            (Self::Transit, Picked) => InTransit,
            (Self::Deliver, Picked | InTransit) => Delivered,
            (Self::Fail, Picked | InTransit) => Failed,
            (Self::Cancel, Bound | Picked | InTransit) => Cancelled,
            _ => {
                return Err(CoreError::Conflict(format!(
                    "illegal transition: {} from {}",
                    self.as_str(),
                    from.as_str()
                )))
            }
        };
        Ok(next)
    }

    /// Whether the scope check runs against the pickup-side code (the
    /// courier's reported location) or the bound delivery code.
    pub fn is_delivery_phase(&self) -> bool {
        matches!(self, Self::Deliver)
    }
}

/// Immutable scan record. The sequence of events for a barcode is the
/// authoritative timeline, monotonic in (seq, timestamp).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanEvent {
    pub id: Uuid,
    pub barcode: String,
    pub seq: i32,
    pub scanned_by: Uuid,
    pub scan_type: ScanType,
    pub op_code: Option<OpCode>,
    pub old_status: BarcodeStatus,
    pub new_status: BarcodeStatus,
    pub location: Option<String>,
    pub note: Option<String>,
    pub device: Option<String>,
    pub ip: Option<String>,
    pub timestamp: DateTime<Utc>,
}

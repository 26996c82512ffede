//! Fault vocabulary shared between the hub's API layer and its clients
//!
//! `FaultCode` is the wire-level companion to [`crate::SchedulerError`]:
//! it gives every scheduler error a small numeric code so a build host (or
//! any other RPC caller) can branch on failure kind without parsing error
//! strings.

use serde::{Deserialize, Serialize};

/// Numeric fault codes returned on the wire alongside an error message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u32)]
pub enum FaultCode {
    /// The advisory scheduler lock was held elsewhere; the tick was skipped.
    /// Not normally surfaced to RPC callers, listed for completeness.
    LockBusy = 1000,
    /// A lost race: the task was no longer FREE when the assignment
    /// transaction committed.
    TaskAlreadyAssigned = 1001,
    /// A host attempted a state transition on a task not assigned to it.
    WrongHost = 1002,
    /// No eligible host existed for a task in this tick. Informational,
    /// not normally surfaced as an RPC fault.
    NoCandidates = 1003,
    /// Invalid configuration; fatal at startup only.
    ConfigError = 1004,
    /// The durable store returned an error.
    DatabaseError = 1005,
    /// The request body or parameters failed validation.
    BadRequest = 1006,
    /// The caller's API key was missing or incorrect.
    Unauthorized = 1007,
}

/// A structured fault returned to an RPC caller: a numeric code plus a
/// human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fault {
    pub code: FaultCode,
    pub message: String,
}

impl Fault {
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_round_trips_through_json() {
        let fault = Fault::new(FaultCode::WrongHost, "task 42 is not assigned to host 7");
        let json = serde_json::to_string(&fault).unwrap();
        let back: Fault = serde_json::from_str(&json).unwrap();
        assert_eq!(fault, back);
    }
}

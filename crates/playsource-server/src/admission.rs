//! Admission control for outstanding songs.

use std::fmt;

/// Counts songs accepted but not yet finished within one queue session.
#[derive(Debug)]
pub struct AdmissionCounter {
    in_flight: usize,
    capacity: usize,
}

/// A completion arrived with no matching admission.
#[derive(Debug, PartialEq, Eq)]
pub struct AdmissionUnderflow;

impl fmt::Display for AdmissionUnderflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("admission counter would go negative")
    }
}

impl std::error::Error for AdmissionUnderflow {}

impl AdmissionCounter {
    pub fn new(capacity: usize) -> Self {
        Self {
            in_flight: 0,
            capacity,
        }
    }

    /// `true` when another song may be accepted.
    pub fn has_capacity(&self) -> bool {
        self.in_flight < self.capacity
    }

    pub fn admit(&mut self) {
        self.in_flight += 1;
    }

    /// Record a finished song.
    pub fn release(&mut self) -> Result<(), AdmissionUnderflow> {
        self.in_flight = self.in_flight.checked_sub(1).ok_or(AdmissionUnderflow)?;
        Ok(())
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

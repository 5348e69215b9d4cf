use aya::maps::MapError;
use thiserror::Error;

/// Failures of the control-plane table operations. The hot path never sees
/// these; it only ever reads the table.
#[derive(Error, Debug)]
pub enum TableError {
    #[error("redirect table is full ({capacity} entries)")]
    CapacityExceeded { capacity: u32 },
    #[error("redirect map operation failed: {0}")]
    Map(#[from] MapError),
}

#[derive(Error, Debug, Eq, PartialEq)]
pub enum LicenseError {
    #[error("program object declares no license")]
    Missing,
    #[error("program object declares license {found:?}, expected {expected:?}")]
    Mismatch {
        found: String,
        expected: &'static str,
    },
    #[error("failed to read program object: {0}")]
    Object(String),
}

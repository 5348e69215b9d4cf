//! Userspace side of the XDP redirect program: table management, counter
//! export and a host dataplane that runs the same decision core.

pub mod counters;
pub mod dataplane;
pub mod error;
pub mod license;
pub mod resolve;
pub mod table;

pub use counters::{CounterReport, SharedCounters};
pub use dataplane::{Dataplane, Verdict};
pub use error::{LicenseError, TableError};
pub use table::{FixedTargetTable, PinnedTargetTable, TargetTable};

//! Shared-memory ring engine: region, layout, claim/commit protocol.

pub mod backoff;
pub mod clock;
pub mod error;
pub mod layout;
pub mod mmap;
pub mod region;
pub mod ring;
pub mod wait;

pub use clock::{Clock, ManualClock, QuantaClock, SystemClock};
pub use error::{Error, Result};
pub use region::SharedHandle;
pub use ring::{OverflowPolicy, ReadClaim, RingBuffer, RingStats, WriteClaim};

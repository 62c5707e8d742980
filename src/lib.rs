//! Lock-free shared-memory ring buffers for order intake and market-data fan-out.
//!
//! [`RingBuffer`] is the engine: a fixed-capacity slot array in a shared
//! mapping, claimed and committed by any number of producer and consumer
//! threads or processes through atomics alone. [`OrderQueue`] puts a
//! reject-on-full queue in front of it; [`Distributor`] keeps one
//! overwrite-oldest ring per key and fans updates out to subscribers.

pub mod config;
pub mod conflation;
pub mod core;
pub mod distribution;
pub mod queue;
pub mod record;

pub use config::{DistributorConfig, EngineConfig, QueueConfig, RingConfig};
pub use conflation::ConflationPolicy;
pub use crate::core::{
    Clock, Error, ManualClock, OverflowPolicy, QuantaClock, ReadClaim, Result, RingBuffer,
    RingStats, SharedHandle, SystemClock, WriteClaim,
};
pub use distribution::{Distributor, PublishOutcome, Subscriber, SubscriptionId};
pub use queue::{OrderQueue, RecordQueue};
pub use record::{Order, OrderRecord, Record, Sequenced, Tick, TickRecord};

//! Entities that allow observing the driver's behaviour.

pub mod metrics;

#![forbid(unsafe_code)]
//! App Lifecycle Monitor (Module K) for the AutoMobile device-automation
//! core: polls tracked app package ids for presence and publishes
//! launch/terminate events onto a broadcast channel.

mod error;
mod monitor;

pub use error::EventsError;
pub use monitor::{LifecycleEvent, LifecycleEventKind, LifecycleMonitor};

//! Patient consent and access-control engine.
//!
//! A provider may read a patient's data only while a consent record grants
//! it, only for the categories that record covers, and only until it
//! expires. Emergency overrides are always written to the audit trail.

pub mod clock;
pub mod config;
pub mod error;
pub mod logger;
pub mod models;
pub mod repository;
pub mod services;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConsentError, ConsentResult};
pub use services::ConsentService;

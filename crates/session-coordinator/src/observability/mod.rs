//! Health probes and process-level observability.

pub mod health;

pub use health::{health_router, HealthState};

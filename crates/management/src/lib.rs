//! REST endpoints for campaigns, steps,
//! executions and per-customer progress under `/api/marketing`.
//!
//! State lives in the drip engine's in-memory store.

pub mod handlers;
pub mod models;
pub mod router;

pub use handlers::{ApiError, ManagementState};
pub use router::marketing_router;

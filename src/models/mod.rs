//! Response models for the operational API

pub mod responses;

pub use responses::HealthResponse;

//! Application services: lifetime resolution, header emission, session
//! gating and invalidation.

pub mod error;
pub mod headers;
pub mod invalidation;
pub mod session;
pub mod ttl;

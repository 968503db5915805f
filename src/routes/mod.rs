//! Router Module Index
//!
//! Routing is segregated by access level so that the authentication filter
//! is applied explicitly at the module boundary rather than per handler.
//! The admission-control and timeout filters wrap both groups; see
//! `create_router` in lib.rs for the composed pipeline order.

/// Routes reachable without credentials: health, registration, login and
/// account activation.
pub mod public;

/// Routes behind the bearer-token gate: everything touching posts, comments,
/// follow relations and user profiles.
pub mod authenticated;

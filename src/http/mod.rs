//! The collaborator-facing HTTP surface (spec §6): project status lookup
//! and pledge submission, bound as a plain HTTP `axum` router — TLS
//! termination is explicitly out of scope.

pub mod client;
pub mod server;
pub mod slug;
pub mod status;

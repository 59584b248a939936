//! Assurance-contract crowdfunding protocol on top of Bitcoin.
//!
//! A project owner publishes a signed description of a funding goal.
//! Backers create pledges: partially signed, ANYONECANPAY-flagged
//! transactions spending one of their own outputs into the project's exact
//! outputs. Once pledges summing to the goal exist, any party can combine
//! them into a single claim transaction.

pub mod backoff;
pub mod envelope;
pub mod primitives;
pub mod utxo;
pub mod validation;
pub mod claim;
pub mod executor;
pub mod observable;
pub mod wallet;
pub mod backend;
pub mod http;
pub mod config;
pub mod logging;
pub mod error;

#[cfg(test)]
mod tests;

pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/crowdfund.rs"));
}

pub use envelope::{project::Project, pledge::Pledge};

//! The pledging wallet (spec §4.5): HD key derivation, a minimal
//! standalone coin-tracking wallet, the pledge creation/commit/revoke
//! machinery built on top of it, and its persisted extension state.

pub mod keys;
pub mod pledging_wallet;
pub mod simple_wallet;
pub mod state;

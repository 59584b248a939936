//! Script and transaction primitives used by pledge validation, pledge
//! creation, and claim assembly. The `bitcoin` crate supplies parsing,
//! serialization and sighash computation; this module supplies the
//! protocol-specific layer on top: classifying scriptPubKeys into the four
//! recognized standard forms, computing their expected scriptSig arity, and
//! signing/verifying ANYONECANPAY inputs for each form (spec §4.2).

pub mod script;
pub mod sighash;

//! mongodrift-sampler library.
//!
//! Captures a MongoDB deployment's databases, users, and replica-set layout
//! as sorted, line-oriented text for the drift detector.

pub mod inventory;
pub mod mongo;

pub use inventory::Inventory;
pub use mongo::MongoSampler;

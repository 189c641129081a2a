//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the workspace: batch
//! data types, collaborator traits and configuration.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Generation Model
//! - Each key has one open batch at a time, identified by its `generation`
//! - A flush closes the open generation and opens `generation + 1`
//! - Anything referring to an older generation is stale

mod batch;
mod batch_key;
mod config;
mod error;
mod item;
mod sink;
mod store;
mod timer;

pub use batch::*;
pub use batch_key::BatchKey;
pub use config::*;
pub use error::*;
pub use item::Item;
pub use sink::*;
pub use store::*;
pub use timer::*;

//! Configuration-tree translation engine.
//!
//! Translates between a hierarchical configuration tree and a device that
//! is driven by request/reply calls. Per-node customizers do the device
//! work; the engine composes them:
//!
//! - **[`read`]**: composite reader assembling subtrees from reader
//!   customizers, including keyed lists and structural containers
//! - **[`write`]**: composite writer turning a before/after pair into
//!   ordered create, update and delete calls
//! - **[`registry`]**: the dependency-ordered handler registry both sides
//!   dispatch through
//! - **[`naming`]**: identity maps between external names and device keys,
//!   with artificial names for resources created outside the engine
//! - **[`context`]**: per-transaction caches and the identity-map overlay
//! - **[`engine`]**: the facade owning all of the above
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod config;
pub mod context;
pub mod data;
pub mod device;
pub mod engine;
pub mod error;
pub mod logging;
pub mod naming;
pub mod path;
pub mod read;
pub mod registry;
pub mod schema;
pub mod write;

pub use engine::{Engine, EngineBuilder, WriteReport};
pub use error::EngineError;
pub use path::NodePath;

//! Data model shared by the engine and the CLI: requests, the variation
//! planner, persisted run documents and the run event log.

pub mod error;
pub mod events;
pub mod models;
pub mod plan;
pub mod runs;

pub use error::{CommanderError, CommanderResult};

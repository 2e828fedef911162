pub mod cache;
pub mod categories;
pub mod config;
pub mod data;
pub mod departments;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod processing;
pub mod render;
pub mod server;
pub mod transactions;
pub mod types;

pub use error::{PipelineError, Result};

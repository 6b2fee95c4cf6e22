//! Songplay ETL library - collection, transforms and loading shared by the binary.

pub mod collect;
pub mod config;
pub mod error;
pub mod load;
pub mod logs;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod schema;
pub mod songs;

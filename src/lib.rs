pub mod calibration;
pub mod config;
pub mod curve;
pub mod engine;
pub mod error;
pub mod features;
pub mod model;
pub mod parquet_source;
pub mod position;
pub mod records;
pub mod sqlite_store;
pub mod tiered_filter;

pub use engine::{Engine, PropRequest};
pub use error::{EngineError, EngineResult};

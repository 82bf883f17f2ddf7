// src/config/mod.rs

//! Analysis requests: the TOML data model (`model.rs`), loading from disk
//! (`loader.rs`) and validation (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_request_path, load_and_validate, load_from_path, parse_str};
pub use model::{
    AnalysisConfig, AnalysisRequest, CacheSection, DatasetConfig, RawAnalysisRequest,
    SchedulerSection,
};

// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{AnalysisRequest, RawAnalysisRequest};
use crate::errors::Result;

/// Read a request file and return the raw `RawAnalysisRequest`.
///
/// This only performs TOML deserialization; references, cycles and
/// scheduler bounds are checked by [`load_and_validate`].
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawAnalysisRequest> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    parse_str(&contents)
}

/// Parse a request from TOML text without validating it.
pub fn parse_str(contents: &str) -> Result<RawAnalysisRequest> {
    let request: RawAnalysisRequest = toml::from_str(contents)?;
    Ok(request)
}

/// Load a request file and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - unknown `inputs` and `after` references,
///   - names declared as both dataset and analysis,
///   - dependency cycles,
///   - scheduler bounds.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<AnalysisRequest> {
    let raw = load_from_path(&path)?;
    let request = AnalysisRequest::try_from(raw)?;
    Ok(request)
}

/// `Anadag.toml` in the current directory, unless `ANADAG_REQUEST` names
/// another file.
pub fn default_request_path() -> PathBuf {
    std::env::var_os("ANADAG_REQUEST")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("Anadag.toml"))
}

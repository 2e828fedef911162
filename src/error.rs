use thiserror::Error;

use crate::types::Crs;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed WKT geometry: {0}")]
    MalformedGeometry(String),

    #[error("resource unavailable: {path}: {reason}")]
    ResourceUnavailable { path: String, reason: String },

    #[error("area summation requires a projected CRS, dataset is in {0}")]
    UnprojectedArea(Crs),

    #[error("projection {from} -> {to} failed: {reason}")]
    Projection { from: Crs, to: Crs, reason: String },

    #[error("{path}: {reason}")]
    Schema { path: String, reason: String },

    #[error("invalid mapping table '{table}': {reason}")]
    InvalidMapping { table: String, reason: String },

    #[error("unknown department code '{0}'")]
    UnknownDepartment(String),

    #[error("{path}: {reason}")]
    DepartmentScope { path: String, reason: &'static str },

    #[error("unsupported CRS '{0}'")]
    UnsupportedCrs(String),
}

impl PipelineError {
    pub fn unavailable(path: &str, reason: impl ToString) -> Self {
        PipelineError::ResourceUnavailable {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn schema(path: &str, reason: impl ToString) -> Self {
        PipelineError::Schema {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

//! Error types for construction and configuration surfaces.
//!
//! The collision pipeline itself is total: degenerate input produces empty
//! manifolds, zero mass or a `Failed` time of impact. Only building shapes,
//! validating settings and addressing world objects can fail.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// Polygon input does not describe a convex hull with area.
    #[error("invalid polygon: {0}")]
    InvalidPolygon(String),

    /// Chain vertices are too few or too close together.
    #[error("invalid chain: {0}")]
    InvalidChain(String),

    /// A tunable is outside its valid range.
    #[error("invalid setting `{name}`: {reason}")]
    InvalidSettings { name: &'static str, reason: String },

    /// A body or fixture handle that has been destroyed.
    #[error("stale {0} handle")]
    StaleHandle(&'static str),
}

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

//! Error surface for the core.
//!
//! Expected failure conditions are represented as `CoreError` variants and
//! never panic; an internal panic is a bug (see crate-level docs).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("coordinate {axis} value {value} is out of range for {space}")]
    OutOfRange {
        space: &'static str,
        axis: &'static str,
        value: f32,
    },

    #[error("unknown token {0:#010x}")]
    UnknownToken(u32),

    #[error("unknown edge ({0:#010x}, {1:#010x})")]
    UnknownEdge(u32, u32),

    #[error("connection cannot reference a token and itself ({0:#010x})")]
    SelfLoop(u32),

    #[error("token {0:#010x} is already at the degree cap")]
    DegreeCap(u32),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("malformed token: {0}")]
    MalformedToken(&'static str),

    #[error("malformed CDNA record: {0}")]
    MalformedCdna(&'static str),
}

pub type CoreResult<T> = Result<T, CoreError>;

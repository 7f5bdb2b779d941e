use thiserror::Error;

/// Failures raised by the aggregation core.
///
/// An empty input is not an error: "no learners yet" yields empty tables.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("division undefined: {0}")]
    DivisionUndefined(&'static str),
}

pub type CoreResult<T> = Result<T, CoreError>;

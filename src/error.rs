use thiserror::Error;

pub type Result<T> = std::result::Result<T, SurvivalError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SurvivalError {
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("dimensions don't match: {message}")]
    InvalidDimensions { message: String },

    #[error("not enough data: {message}")]
    InsufficientData { message: String },

    #[error("parameter out of range: {parameter} = {value} ({message})")]
    Domain {
        parameter: String,
        value: String,
        message: String,
    },

    #[error("optimization did not converge after {iterations} iterations (gradient norm {gradient_norm:e})")]
    Convergence { iterations: usize, gradient_norm: f64 },

    #[error("hessian is singular: {message}")]
    SingularHessian { message: String },

    #[error("invariant violated: {message}")]
    InvariantViolation { message: String },

    #[error("metric is undefined: {message}")]
    UndefinedMetric { message: String },

    #[error("censoring weight undefined at t = {time}: censoring survival is zero")]
    UndefinedWeight { time: f64 },

    #[error("i/o failure: {message}")]
    Io { message: String },
}

impl SurvivalError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput { message: message.into() }
    }

    pub fn invalid_dimensions(message: impl Into<String>) -> Self {
        Self::InvalidDimensions { message: message.into() }
    }

    pub fn insufficient_data(message: impl Into<String>) -> Self {
        Self::InsufficientData { message: message.into() }
    }

    pub fn domain(
        parameter: impl Into<String>,
        value: impl ToString,
        message: impl Into<String>,
    ) -> Self {
        Self::Domain {
            parameter: parameter.into(),
            value: value.to_string(),
            message: message.into(),
        }
    }

    pub fn singular_hessian(message: impl Into<String>) -> Self {
        Self::SingularHessian { message: message.into() }
    }

    pub fn invariant_violation(message: impl Into<String>) -> Self {
        Self::InvariantViolation { message: message.into() }
    }

    pub fn undefined_metric(message: impl Into<String>) -> Self {
        Self::UndefinedMetric { message: message.into() }
    }
}

impl From<csv::Error> for SurvivalError {
    fn from(err: csv::Error) -> Self {
        Self::Io { message: err.to_string() }
    }
}

impl From<std::io::Error> for SurvivalError {
    fn from(err: std::io::Error) -> Self {
        Self::Io { message: err.to_string() }
    }
}

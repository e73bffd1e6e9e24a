use thiserror::Error;

/// The error taxonomy for the whole crate: configuration mistakes, malformed
/// input, numerical corruption, and I/O failures all funnel through this type
/// so that a worker thread can signal the scheduler and unwind in an orderly
/// way instead of aborting the process.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("input shape error: {0}")]
    InputShape(String),

    #[error("numerical error: {0}")]
    Numerical(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrainError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        TrainError::Configuration(msg.into())
    }

    pub fn shape<S: Into<String>>(msg: S) -> Self {
        TrainError::InputShape(msg.into())
    }

    pub fn numerical<S: Into<String>>(msg: S) -> Self {
        TrainError::Numerical(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, TrainError>;

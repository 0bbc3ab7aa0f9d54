//! Error types for convtune

use crate::conv::Direction;
use crate::dtype::DType;
use thiserror::Error;

/// Result type alias using convtune's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while sizing, searching or executing a convolution
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid caller-supplied parameter (null buffer, bad rank, bad descriptor value)
    #[error("Bad parameter '{arg}': {reason}")]
    BadParam {
        /// The offending argument
        arg: &'static str,
        /// Reason for rejection
        reason: String,
    },

    /// Derived-shape computation or execution given inconsistent shapes
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        got: Vec<usize>,
    },

    /// Element types differ between operands
    #[error("DType mismatch: {lhs:?} vs {rhs:?}")]
    DTypeMismatch {
        /// Left-hand side dtype
        lhs: DType,
        /// Right-hand side dtype
        rhs: DType,
    },

    /// Requested behaviour is not supported (e.g. alpha/beta blending)
    #[error("Not implemented: {feature}")]
    NotImplemented {
        /// Description of the unimplemented feature
        feature: &'static str,
    },

    /// Supplied workspace is smaller than the strategy requires
    #[error("Insufficient workspace for {algorithm}: required {required} bytes, provided {provided}")]
    InsufficientWorkspace {
        /// Strategy that needed the workspace
        algorithm: &'static str,
        /// Required bytes
        required: usize,
        /// Declared capacity in bytes
        provided: usize,
    },

    /// Strategy workspace exceeds the memory ceiling of the device class
    #[error("{algorithm} needs {required} bytes of workspace, above the device ceiling of {ceiling}")]
    MemoryConstrained {
        /// Strategy that was downgraded
        algorithm: &'static str,
        /// Bytes the strategy would need
        required: usize,
        /// Configured ceiling for the device class
        ceiling: usize,
    },

    /// Search exhausted every candidate
    #[error("No applicable algorithm for {direction:?} convolution")]
    NoApplicableAlgorithm {
        /// Direction that was searched
        direction: Direction,
    },

    /// The chosen strategy cannot run this problem
    #[error("Algorithm {algorithm} is not applicable: {reason}")]
    AlgorithmNotApplicable {
        /// Strategy name
        algorithm: &'static str,
        /// Which gate failed
        reason: String,
    },

    /// Program cache lookup for a kernel that was never added
    #[error("No kernel registered for algorithm '{algorithm}' and config '{network_config}'")]
    KernelNotFound {
        /// Algorithm half of the key
        algorithm: String,
        /// Network-config half of the key
        network_config: String,
    },

    /// Backend-specific error
    #[error("Backend error: {0}")]
    Backend(String),
}

impl Error {
    /// Create a bad parameter error
    pub fn bad_param(arg: &'static str, reason: impl Into<String>) -> Self {
        Self::BadParam {
            arg,
            reason: reason.into(),
        }
    }

    /// Create a shape mismatch error
    pub fn shape_mismatch(expected: &[usize], got: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    /// Create an insufficient workspace error
    pub fn insufficient_workspace(algorithm: &'static str, required: usize, provided: usize) -> Self {
        Self::InsufficientWorkspace {
            algorithm,
            required,
            provided,
        }
    }

    /// Create a not-applicable error
    pub fn not_applicable(algorithm: &'static str, reason: impl Into<String>) -> Self {
        Self::AlgorithmNotApplicable {
            algorithm,
            reason: reason.into(),
        }
    }
}

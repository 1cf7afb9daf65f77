use burn_tensor::DType;

/// Errors raised by the collective transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommError {
    /// The channel to or from a peer was closed.
    #[error("Connection with rank {peer} is closed")]
    Disconnected {
        /// The rank on the other side of the channel.
        peer: usize,
    },
    /// The peer does not exist in this world.
    #[error("Unknown rank {peer} (world size {world_size})")]
    UnknownPeer {
        /// The requested rank.
        peer: usize,
        /// Number of ranks in the world.
        world_size: usize,
    },
}

/// Errors that can occur when building or converting global tensors.
///
/// All of them are deterministic functions of the inputs and are never retried.
#[derive(Debug, thiserror::Error)]
pub enum GlobalError {
    /// The rank grid of a placement is invalid.
    #[error("Invalid placement: {0}")]
    InvalidPlacement(String),
    /// The SBP descriptor does not fit the placement or the tensor.
    #[error("Invalid distribution: {0}")]
    InvalidDistribution(String),
    /// The operation has no meaning under the requested distribution.
    #[error("Unsupported distribution: {0}")]
    UnsupportedDistribution(String),
    /// The local payload disagrees with the shape implied by the distribution.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Shape implied by the metadata.
        expected: Vec<usize>,
        /// Shape actually provided.
        actual: Vec<usize>,
    },
    /// The calling rank holds no local component for this tensor.
    #[error("Rank {rank} is not part of {placement}")]
    NonParticipantAccess {
        /// The calling rank.
        rank: usize,
        /// Display form of the placement.
        placement: String,
    },
    /// The element type is not handled by the local data helpers.
    #[error("Unsupported dtype {0:?}")]
    UnsupportedDType(DType),
    /// An argument is out of its domain.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// The local tensor data could not be read with the expected element type.
    #[error("Tensor data error: {0}")]
    Data(String),
    /// The collective transport failed.
    #[error(transparent)]
    Comm(#[from] CommError),
    /// The configuration could not be (de)serialized.
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
    /// Reading or writing a configuration file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used across the crate.
pub type Result<T> = core::result::Result<T, GlobalError>;

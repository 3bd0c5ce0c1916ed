use crate::*;

use thiserror::Error;

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("maci: tree is full (capacity {0})")]
    CapacityExceeded(usize),

    #[error("maci: index {index} out of range (length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("maci: invalid tree arity {0}, must be between 2 and 5")]
    InvalidArity(usize),

    #[error("maci: invalid batch - start {start}, size {size}: {reason}")]
    InvalidBatch {
        start: usize,
        size: usize,
        reason: &'static str,
    },

    #[error("maci: value out of range: {0}")]
    ValueOutOfRange(String),

    #[error("maci: invalid field element: {0}")]
    InvalidFieldElement(String),

    #[error("maci: point is not on the curve or not in the prime-order subgroup")]
    InvalidPoint,

    #[error("maci: ElGamal ciphertext decrypts to neither 0 nor 1")]
    InvalidCiphertext,

    #[error("maci: deactivated key status decrypts to 0")]
    StatusMismatch,

    #[error("maci: deactivated key leaf {0} not found or merkle proof does not verify")]
    LeafNotFound(usize),

    #[error("maci: nullifier has already been consumed")]
    NullifierReused,

    #[error("maci: poll {0} not found")]
    PollNotFound(u64),

    #[error("maci: poll is {found}, expected {expected}")]
    InvalidPollStatus {
        expected: &'static str,
        found: PollStatus,
    },

    #[error("maci: voting period is still active until {0}")]
    VotingPeriodActive(u64),

    #[error("maci: all batches have already been processed")]
    NoMoreBatches,

    #[error("maci: invalid config: {0}")]
    InvalidConfig(String),

    #[error("maci: CBOR error deserializing snapshot: {0}")]
    CBORDeserialization(#[from] serde_cbor::Error),

    #[error("maci: JSON error deserializing snapshot: {0}")]
    JSONDeserialization(#[from] serde_json::Error),

    #[error("maci: error deserializing snapshot: unknown format")]
    DeserializationUnknownFormat,
}

/// Reasons a published command is rejected during batch processing.
///
/// A rejected command is a no-op: the batch carries on and the reason is
/// only recorded in the witness and the log.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationError {
    #[error("maci validation: state index {0} is out of range")]
    InvalidStateIndex(u64),

    #[error("maci validation: invalid signature")]
    InvalidSignature,

    #[error("maci validation: expected nonce {expected}, got {found}")]
    InvalidNonce { expected: u64, found: u64 },

    #[error("maci validation: insufficient voice credits")]
    InsufficientCredits,

    #[error("maci validation: vote option {0} is out of range")]
    InvalidVoteOption(u64),

    #[error("maci validation: vote weight {0} exceeds the configured bit width")]
    VoteWeightTooLarge(u64),

    #[error("maci validation: command is for poll {found}, expected {expected}")]
    PollIdMismatch { expected: u64, found: u64 },

    #[error("maci validation: vote with a zero public key is a deactivation request")]
    DeactivationRequest,

    #[error("maci validation: deactivation request must carry a zero public key")]
    NotADeactivationRequest,

    #[error("maci validation: key for state index {0} has been deactivated")]
    KeyDeactivated(u64),

    #[error("maci validation: new public key is not a valid curve point")]
    InvalidNewPublicKey,

    #[error("maci validation: nullifier has no authorization")]
    UnknownNullifier,

    #[error("maci validation: key change already applied")]
    KeyChangeAlreadyApplied,

    #[error("maci validation: key change does not match its authorization")]
    KeyChangeMismatch,

    #[error("maci validation: rerandomized status does not decrypt to 1")]
    InvalidStatus,

    #[error("maci validation: message type not accepted here")]
    WrongMessageType,

    #[error("maci validation: top-up would overflow the voice credit balance")]
    BalanceOverflow,
}

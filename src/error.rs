use num_bigint::BigUint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("prime pool is empty")]
    PoolEmpty,

    #[error("prime pool too small: have={have} need={need}")]
    InsufficientPool { have: usize, need: usize },

    #[error("modulus {modulus} is not coprime with the rest of the modulus set")]
    NonCoprimeModuli { modulus: BigUint },

    #[error("moduli/remainders count mismatch: {moduli} moduli, {remainders} remainders")]
    MismatchedLengths { moduli: usize, remainders: usize },

    #[error("modulus set is empty")]
    EmptyModuli,

    #[error("no remainders generated for this request")]
    EmptyRemainders,

    #[error("remainder {index} is not in [0, modulus)")]
    RemainderOutOfRange { index: usize },

    #[error("CRT validation failed: {0}")]
    CrtValidation(String),

    #[error("masked identity does not reverse to the claimed subject")]
    MaskMismatch,

    #[error("only {received} of {required} issuers returned a modulus")]
    IncompleteModuli { received: usize, required: usize },

    #[error("issuer {issuer} failed: {reason}")]
    Issuer { issuer: String, reason: String },

    #[error("invalid proof")]
    InvalidProof,

    #[error("hash-to-curve found no point after {0} candidates")]
    HashToCurveExhausted(usize),

    #[error("point is not on the curve")]
    InvalidPoint,

    #[error("scalar out of range")]
    InvalidScalar,

    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("session {0} already finished")]
    SessionTerminal(String),

    #[error("session {0} already exists")]
    SessionExists(String),

    #[error("deadline exceeded while {0}")]
    NetworkTimeout(&'static str),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("peer returned an error: {0}")]
    Remote(String),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("timestamp formatting failed: {0}")]
    Timestamp(#[from] time::error::Format),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

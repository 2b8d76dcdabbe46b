// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! A list of error types which are produced while sharing, recovering and
//! transferring confidential state
use core::fmt::Debug;
use thiserror::Error;

/// The default Result type used in this crate
pub type Result<T> = std::result::Result<T, InternalError>;

/// Represents an error in the manipulation of internal cryptographic data, or
/// in the protocols built on top of it
#[derive(Clone, Eq, PartialEq, Error, Debug)]
#[allow(missing_docs)]
pub enum InternalError {
    #[error("Serialization Error")]
    Serialization,
    #[error("Failed to verify proof: `{0}`")]
    FailedToVerifyProof(String),
    #[error("Contributors disagree on `{0}`")]
    Disagreement(String),
    #[error("Not enough valid contributions: needed {needed}, got {got}")]
    NotEnoughContributions { needed: usize, got: usize },
    #[error("Could not invert a Scalar")]
    CouldNotInvertScalar,
    #[error("Could not hash to a curve point")]
    HashToCurve,
    #[error("Symmetric encryption failed")]
    Encryption,
    #[error("Symmetric decryption failed")]
    Decryption,
    #[error("Unsupported cipher algorithm: `{0}`")]
    UnsupportedCipher(String),
    #[error("No key is known for process {0}")]
    UnknownKey(u32),
    #[error("Invalid configuration: `{0}`")]
    Configuration(String),
    #[error("Function call contained invalid arguments: `{0}`")]
    InvalidArgument(String),
    #[error("Represents some code assumption that was checked at runtime but failed to be true")]
    InternalInvariantFailed,
    #[error("Transport error: `{0}`")]
    Transport(String),
    #[error("Timed out waiting for state")]
    Timeout,
    #[error("The state transfer round was cancelled")]
    Cancelled,
    #[error("Recovered share failed its final verification: `{0}`")]
    FatalRecovery(String),
}

impl InternalError {
    /// Whether the error is a post-quorum invariant violation. Such an error
    /// must never lead to installing state; the caller decides whether to halt
    /// or to retry the whole round.
    pub fn is_fatal(&self) -> bool {
        matches!(self, InternalError::FatalRecovery(_))
    }
}

impl From<std::io::Error> for InternalError {
    fn from(e: std::io::Error) -> Self {
        InternalError::Transport(e.to_string())
    }
}

macro_rules! serialize {
    ($x:expr) => {{
        bincode::serialize($x).or(Err(crate::errors::InternalError::Serialization))
    }};
}

macro_rules! deserialize {
    ($x:expr) => {{
        bincode::deserialize($x).or(Err(crate::errors::InternalError::Serialization))
    }};
}

macro_rules! verify_err {
    ($x:expr) => {{
        Err(crate::errors::InternalError::FailedToVerifyProof(
            String::from($x),
        ))
    }};
}

macro_rules! arg_err {
    ($x:expr) => {{
        Err(crate::errors::InternalError::InvalidArgument(String::from(
            $x,
        )))
    }};
}

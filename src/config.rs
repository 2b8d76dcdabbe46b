// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Runtime configuration of the confidentiality layer.
//!
//! A [`VssrConfig`] is built once by the embedding process and handed to
//! every component at construction. It can be read from JSON or from the
//! `key = value` properties format used by existing deployments.

use crate::{
    cipher::CipherAlgorithm,
    commitment::CommitmentKind,
    errors::{InternalError, Result},
    parameters::{
        DEFAULT_RECOVERY_PORT, INITIAL_STATE_TIMEOUT_MS, SECP256K1_GENERATOR_HEX,
        SECP256K1_ORDER_HEX, SECP256K1_PRIME_HEX,
    },
};
use k256::{ProjectivePoint, PublicKey};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Configuration of the sharing scheme, its encryption, and the blinded
/// state transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VssrConfig {
    /// Which commitment scheme makes shares verifiable.
    pub commitment_scheme: CommitmentKind,
    /// Modulus of the base field, hex. Only secp256k1 is supported.
    pub prime_field: Option<String>,
    /// Order of the group, hex.
    pub sub_field: Option<String>,
    /// Generator of the group, hex SEC1 encoding.
    pub generator: Option<String>,
    /// Cipher protecting shared payloads.
    pub data_encryption_algorithm: String,
    /// Cipher protecting shares in transit.
    pub share_encryption_algorithm: String,
    /// Base port of the state transfer listeners; a replica listens on
    /// `recovery_port + process id`.
    pub recovery_port: u16,
    /// When set, the channel to clients is already encrypted and responses
    /// carry their shares in the clear.
    pub use_tls_encryption: bool,
    /// Width of the worker pool recovering shares during state transfer.
    pub share_processing_threads: usize,
    /// Check every share of a client request against its commitment before
    /// executing it.
    pub verify_client_requests: bool,
    /// Initial state transfer timeout, in milliseconds.
    pub state_timeout: u64,
}

impl Default for VssrConfig {
    fn default() -> Self {
        Self {
            commitment_scheme: CommitmentKind::default(),
            prime_field: None,
            sub_field: None,
            generator: None,
            data_encryption_algorithm: "AES".to_string(),
            share_encryption_algorithm: "AES".to_string(),
            recovery_port: DEFAULT_RECOVERY_PORT,
            use_tls_encryption: false,
            share_processing_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            verify_client_requests: false,
            state_timeout: INITIAL_STATE_TIMEOUT_MS,
        }
    }
}

fn config_err(message: impl Into<String>) -> InternalError {
    InternalError::Configuration(message.into())
}

/// Parse a hex number, ignoring an optional `0x` prefix and leading zeros.
fn normalized_hex(value: &str) -> Result<Vec<u8>> {
    let digits = value.trim().trim_start_matches("0x").trim_start_matches("0X");
    let digits = if digits.len() % 2 == 1 {
        format!("0{digits}")
    } else {
        digits.to_string()
    };
    let bytes = hex::decode(digits).map_err(|e| config_err(format!("`{value}`: {e}")))?;
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    Ok(bytes[first..].to_vec())
}

fn check_number(name: &str, value: &Option<String>, expected: &str) -> Result<()> {
    if let Some(value) = value {
        if normalized_hex(value)? != normalized_hex(expected)? {
            return Err(config_err(format!(
                "{name} does not describe secp256k1, the only supported group"
            )));
        }
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    value
        .parse::<bool>()
        .map_err(|_| config_err(format!("{key} expects true or false, got `{value}`")))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| config_err(format!("{key} expects a number, got `{value}`")))
}

impl VssrConfig {
    /// Read a JSON document. Missing fields take their default value.
    pub fn from_json(input: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(input).map_err(|e| config_err(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a properties file of `key = value` lines.
    ///
    /// Blank lines and lines starting with `#` are skipped. Any key not
    /// listed below is an error:
    /// `cobra.vss.scheme`, `cobra.vss.prime_field`, `cobra.vss.sub_field`,
    /// `cobra.vss.generator`, `cobra.vss.data_encryption_algorithm`,
    /// `cobra.vss.share_encryption_algorithm`, `cobra.recovery.port`,
    /// `cobra.communication.use_tls_encryption`,
    /// `cobra.share_processing_threads`, `cobra.verify.requests` and
    /// `cobra.state.timeout`.
    pub fn from_properties(input: &str) -> Result<Self> {
        let mut config = Self::default();
        for (number, line) in input.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| config_err(format!("line {} is not `key = value`", number + 1)))?;
            let (key, value) = (key.trim(), value.trim());
            debug!("Configuration property {} = {}", key, value);
            match key {
                "cobra.vss.scheme" => config.commitment_scheme = value.parse()?,
                "cobra.vss.prime_field" => config.prime_field = Some(value.to_string()),
                "cobra.vss.sub_field" => config.sub_field = Some(value.to_string()),
                "cobra.vss.generator" => config.generator = Some(value.to_string()),
                "cobra.vss.data_encryption_algorithm" => {
                    config.data_encryption_algorithm = value.to_string()
                }
                "cobra.vss.share_encryption_algorithm" => {
                    config.share_encryption_algorithm = value.to_string()
                }
                "cobra.recovery.port" => config.recovery_port = parse_number(key, value)?,
                "cobra.communication.use_tls_encryption" => {
                    config.use_tls_encryption = parse_bool(key, value)?
                }
                "cobra.share_processing_threads" => {
                    config.share_processing_threads = parse_number(key, value)?
                }
                "cobra.verify.requests" => config.verify_client_requests = parse_bool(key, value)?,
                "cobra.state.timeout" => config.state_timeout = parse_number(key, value)?,
                other => return Err(config_err(format!("unknown property `{other}`"))),
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the implementation cannot honour.
    pub fn validate(&self) -> Result<()> {
        let _ = self.data_cipher()?;
        let _ = self.share_cipher()?;
        if self.share_processing_threads == 0 {
            return Err(config_err("share_processing_threads must be at least 1"));
        }
        if self.state_timeout == 0 {
            return Err(config_err("state_timeout must be positive"));
        }
        check_number("prime_field", &self.prime_field, SECP256K1_PRIME_HEX)?;
        check_number("sub_field", &self.sub_field, SECP256K1_ORDER_HEX)?;
        if let Some(generator) = &self.generator {
            if self.commitment_scheme != CommitmentKind::Linear {
                return Err(config_err("a generator only applies to the linear scheme"));
            }
            let bytes = normalized_hex(generator)?;
            let point = PublicKey::from_sec1_bytes(&bytes)
                .map_err(|_| config_err("generator is not a secp256k1 point"))?;
            if point.to_projective() != ProjectivePoint::GENERATOR {
                return Err(config_err(format!(
                    "generator must be the secp256k1 generator {SECP256K1_GENERATOR_HEX}"
                )));
            }
        }
        Ok(())
    }

    /// The cipher protecting payloads.
    pub fn data_cipher(&self) -> Result<CipherAlgorithm> {
        self.data_encryption_algorithm.parse()
    }

    /// The cipher protecting shares.
    pub fn share_cipher(&self) -> Result<CipherAlgorithm> {
        self.share_encryption_algorithm.parse()
    }

    /// The initial state transfer timeout.
    pub fn state_timeout(&self) -> Duration {
        Duration::from_millis(self.state_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() -> Result<()> {
        let config = VssrConfig::default();
        config.validate()?;
        assert_eq!(config.recovery_port, 11000);
        assert_eq!(config.commitment_scheme, CommitmentKind::Linear);
        assert!(config.share_processing_threads >= 1);
        Ok(())
    }

    #[test]
    fn properties_file() -> Result<()> {
        let input = format!(
            "# vssr configuration\n\
             cobra.vss.scheme = constant\n\
             \n\
             cobra.vss.sub_field = 0x{SECP256K1_ORDER_HEX}\n\
             cobra.recovery.port = 12000\n\
             cobra.communication.use_tls_encryption = true\n\
             cobra.share_processing_threads = 3\n\
             cobra.verify.requests = true\n\
             cobra.state.timeout = 500\n"
        );
        let config = VssrConfig::from_properties(&input)?;
        assert_eq!(config.commitment_scheme, CommitmentKind::Constant);
        assert_eq!(config.recovery_port, 12000);
        assert!(config.use_tls_encryption);
        assert!(config.verify_client_requests);
        assert_eq!(config.share_processing_threads, 3);
        assert_eq!(config.state_timeout(), Duration::from_millis(500));
        Ok(())
    }

    #[test]
    fn unknown_or_malformed_properties_are_rejected() {
        assert!(VssrConfig::from_properties("cobra.unknown = 1").is_err());
        assert!(VssrConfig::from_properties("cobra.recovery.port").is_err());
        assert!(VssrConfig::from_properties("cobra.recovery.port = many").is_err());
        assert!(VssrConfig::from_properties("cobra.vss.scheme = feldman").is_err());
        assert!(VssrConfig::from_properties("cobra.vss.data_encryption_algorithm = DES").is_err());
    }

    #[test]
    fn group_parameters_must_be_secp256k1() {
        let good = format!(
            "{{\"prime_field\": \"{SECP256K1_PRIME_HEX}\", \"generator\": \"{SECP256K1_GENERATOR_HEX}\"}}"
        );
        assert!(VssrConfig::from_json(&good).is_ok());
        assert!(VssrConfig::from_json("{\"prime_field\": \"17\"}").is_err());
        assert!(VssrConfig::from_json("{\"generator\": \"02\"}").is_err());
        assert!(VssrConfig::from_json("{\"share_processing_threads\": 0}").is_err());
    }
}

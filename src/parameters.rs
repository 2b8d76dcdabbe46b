// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

/// Domain separation tag for mapping a DPRF input to the curve.
pub(crate) const DPRF_INPUT_DST: &[u8] = b"VSSR-DPRF-secp256k1_XMD:SHA-256_SSWU_RO_input";

/// Domain separation tag for hashing a combined DPRF value to a scalar.
pub(crate) const DPRF_OUTPUT_DST: &[u8] = b"VSSR-DPRF-secp256k1_XMD:SHA-256_output";

/// Seed used by the deterministic DPRF setup when none is configured.
pub(crate) const DPRF_PLACEHOLDER_SEED: [u8; 32] = *b"vssr dprf placeholder setup seed";

/// Label mixed into placeholder symmetric key derivation.
pub(crate) const KEY_DERIVATION_LABEL: &[u8] = b"vssr placeholder symmetric key";

/// Length in bytes of an AES-GCM nonce.
pub(crate) const NONCE_LENGTH: usize = 12;

/// Default TCP port base of the blinded state listener.
pub(crate) const DEFAULT_RECOVERY_PORT: u16 = 11000;

/// How long a recovering replica initially waits for blinded state,
/// in milliseconds. Doubled on every retry.
pub(crate) const INITIAL_STATE_TIMEOUT_MS: u64 = 3_600_000;

/// Largest single length-prefixed field accepted from the network.
pub(crate) const MAX_WIRE_FIELD_LENGTH: usize = 1 << 30;

/// Granularity at which a received common state is fed to its hasher.
pub(crate) const COMMON_STATE_CHUNK: usize = 64 * 1024;

/// Compressed SEC1 encoding of the secp256k1 generator.
pub(crate) const SECP256K1_GENERATOR_HEX: &str =
    "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

/// Base field modulus of secp256k1.
pub(crate) const SECP256K1_PRIME_HEX: &str =
    "fffffffffffffffffffffffffffffffffffffffffffffffffffffffefffffc2f";

/// Group order of secp256k1.
pub(crate) const SECP256K1_ORDER_HEX: &str =
    "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141";

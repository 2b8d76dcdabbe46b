// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Symmetric encryption of shares and payloads.
//!
//! Every pair of processes shares a 256-bit key, held in a [`KeyStore`].
//! Ciphertexts are `nonce || AES-256-GCM(plaintext)`. A cipher instance is
//! built for every call, so concurrent senders never contend on a lock.

use crate::{
    errors::{InternalError, Result},
    parameters::{KEY_DERIVATION_LABEL, NONCE_LENGTH},
    protocol::ProcessId,
    utils::sha256,
};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::{CryptoRng, RngCore};
use std::{collections::HashMap, str::FromStr};
use tracing::error;

/// A supported authenticated cipher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CipherAlgorithm {
    /// AES with a 256-bit key in Galois/Counter mode.
    Aes256Gcm,
}

impl FromStr for CipherAlgorithm {
    type Err = InternalError;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "AES" | "AES-GCM" | "AES-256-GCM" | "AES256GCM" => Ok(CipherAlgorithm::Aes256Gcm),
            _ => Err(InternalError::UnsupportedCipher(name.to_string())),
        }
    }
}

/// A 256-bit symmetric key.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; 32]);

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey([redacted])")
    }
}

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive a key by hashing `material`.
    pub fn derive(material: &[u8]) -> Self {
        Self(sha256(&[material]))
    }
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn encrypt<R: RngCore + CryptoRng>(
    rng: &mut R,
    algorithm: CipherAlgorithm,
    key: &SymmetricKey,
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    match algorithm {
        CipherAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|_| InternalError::Encryption)?;
            let mut nonce = [0u8; NONCE_LENGTH];
            rng.fill_bytes(&mut nonce);
            let ciphertext = cipher
                .encrypt(Nonce::from_slice(&nonce), plaintext)
                .map_err(|_| {
                    error!("AES-GCM encryption failed");
                    InternalError::Encryption
                })?;
            Ok([nonce.as_slice(), ciphertext.as_slice()].concat())
        }
    }
}

/// Decrypt a ciphertext produced by [`encrypt`].
pub fn decrypt(algorithm: CipherAlgorithm, key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>> {
    match algorithm {
        CipherAlgorithm::Aes256Gcm => {
            if data.len() < NONCE_LENGTH {
                return Err(InternalError::Decryption);
            }
            let (nonce, ciphertext) = data.split_at(NONCE_LENGTH);
            let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|_| InternalError::Decryption)?;
            cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| InternalError::Decryption)
        }
    }
}

/// The keys a process shares with every other process (replicas and
/// clients).
#[derive(Clone, Debug)]
pub struct KeyStore {
    me: ProcessId,
    keys: HashMap<ProcessId, SymmetricKey>,
}

impl KeyStore {
    /// An empty store for process `me`.
    pub fn new(me: ProcessId) -> Self {
        Self {
            me,
            keys: HashMap::new(),
        }
    }

    /// A store whose keys are derived from the two process ids.
    ///
    /// Anybody can compute these keys; they stand in for a real key
    /// distribution in tests and demos.
    pub fn derived(me: ProcessId, peers: impl IntoIterator<Item = ProcessId>) -> Self {
        let mut store = Self::new(me);
        for peer in peers {
            let (low, high) = if me <= peer { (me, peer) } else { (peer, me) };
            let material = [
                KEY_DERIVATION_LABEL,
                &low.to_be_bytes(),
                &high.to_be_bytes(),
            ]
            .concat();
            store.insert(peer, SymmetricKey::derive(&material));
        }
        store
    }

    /// Record the key shared with `peer`.
    pub fn insert(&mut self, peer: ProcessId, key: SymmetricKey) {
        let _ = self.keys.insert(peer, key);
    }

    /// The process owning the store.
    pub fn me(&self) -> ProcessId {
        self.me
    }

    /// The key shared with `peer`.
    pub fn key_for(&self, peer: ProcessId) -> Result<&SymmetricKey> {
        self.keys.get(&peer).ok_or(InternalError::UnknownKey(peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn derived_keys_are_symmetric() -> Result<()> {
        let alice = KeyStore::derived(1, [2, 3]);
        let bob = KeyStore::derived(2, [1, 3]);
        assert_eq!(alice.key_for(2)?, bob.key_for(1)?);
        assert_ne!(alice.key_for(2)?, alice.key_for(3)?);
        assert_eq!(alice.key_for(9), Err(InternalError::UnknownKey(9)));
        Ok(())
    }

    #[test]
    fn ciphertexts_are_authenticated() -> Result<()> {
        let mut rng = OsRng;
        let store = KeyStore::derived(0, [1, 2]);
        let key = store.key_for(1)?;
        let ciphertext = encrypt(&mut rng, CipherAlgorithm::Aes256Gcm, key, b"secret share")?;
        assert_eq!(
            decrypt(CipherAlgorithm::Aes256Gcm, key, &ciphertext)?,
            b"secret share".to_vec()
        );

        let mut tampered = ciphertext.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 1;
        assert!(decrypt(CipherAlgorithm::Aes256Gcm, key, &tampered).is_err());
        assert!(decrypt(CipherAlgorithm::Aes256Gcm, store.key_for(2)?, &ciphertext).is_err());
        assert!(decrypt(CipherAlgorithm::Aes256Gcm, key, &ciphertext[..4]).is_err());
        Ok(())
    }

    #[test]
    fn algorithm_names() {
        assert_eq!("AES".parse::<CipherAlgorithm>().ok(), Some(CipherAlgorithm::Aes256Gcm));
        assert_eq!("aes-gcm".parse::<CipherAlgorithm>().ok(), Some(CipherAlgorithm::Aes256Gcm));
        assert!("DES".parse::<CipherAlgorithm>().is_err());
    }
}

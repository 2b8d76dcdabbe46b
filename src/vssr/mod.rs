// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Verifiable secret sharing with recovery.
//!
//! A client shares a secret with a degree-`f` "main" polynomial and
//! additionally deals, for each of the `l = ceil(n/f)` blocks of `f`
//! shareholders, a degree-`f` witness polynomial passing through the DPRF
//! values `y_i = DPRF(r, i)` of the block members. To recover the main share
//! of shareholder `k`, `f + 1` peers send `main(i) + W_block(k)(i)`. These
//! interpolate to `main(k) + y_k` at `k`, and `k` removes `y_k` by jointly
//! evaluating the DPRF from the contributions' partial evaluations. No
//! contribution reveals a main share on its own.
//!
//! [`VssrScheme`] holds what clients and servers share; [`ClientScheme`] and
//! [`ServerScheme`] specialize it.

mod client;
mod recovery;
mod server;
mod share;
#[cfg(test)]
pub(crate) mod testing;

pub use client::ClientScheme;
pub use recovery::{RecoveryContribution, RecoveryOutcome, RecoveryRound, RoundState};
pub use server::ServerScheme;
pub use share::{
    EncryptedShare, OpenPublishedShares, VerifiableShare, VssrPublishedShares, VssrShare,
};

use crate::{
    cipher::{self, CipherAlgorithm, KeyStore},
    commitment::CommitmentScheme,
    config::VssrConfig,
    dprf::DprfParameters,
    errors::{InternalError, Result},
    protocol::{ProcessId, ShareholderId, View},
    utils::{scalar_from_bytes, scalar_to_bytes},
};
use k256::Scalar;
use rand::{CryptoRng, RngCore};
use std::sync::Arc;

/// State and helpers common to the client and server sides.
#[derive(Debug, Clone)]
pub struct VssrScheme {
    view: View,
    commitments: Arc<dyn CommitmentScheme>,
    dprf: Arc<DprfParameters>,
    keys: KeyStore,
    share_cipher: CipherAlgorithm,
    data_cipher: CipherAlgorithm,
}

impl VssrScheme {
    /// Build the scheme for `view`.
    ///
    /// The DPRF threshold must equal the view's `f`.
    pub fn new(
        view: View,
        config: &VssrConfig,
        dprf: Arc<DprfParameters>,
        keys: KeyStore,
    ) -> Result<Self> {
        config.validate()?;
        if dprf.public().threshold() != view.f() {
            return Err(InternalError::Configuration(format!(
                "DPRF threshold {} does not match f = {}",
                dprf.public().threshold(),
                view.f()
            )));
        }
        Ok(Self {
            commitments: config.commitment_scheme.scheme(),
            share_cipher: config.share_cipher()?,
            data_cipher: config.data_cipher()?,
            view,
            dprf,
            keys,
        })
    }

    /// The view the scheme was built for.
    pub fn view(&self) -> &View {
        &self.view
    }

    /// The commitment scheme in use.
    pub fn commitment_scheme(&self) -> &Arc<dyn CommitmentScheme> {
        &self.commitments
    }

    /// The DPRF parameters known to this party.
    pub fn dprf(&self) -> &DprfParameters {
        &self.dprf
    }

    /// The shareholder of a view member.
    pub fn shareholder(&self, process: ProcessId) -> Result<ShareholderId> {
        if !self.view.contains(process) {
            return Err(InternalError::InvalidArgument(format!(
                "process {process} is not part of the view"
            )));
        }
        Ok(ShareholderId::from_process(process))
    }

    /// The view member owning `shareholder`.
    pub fn process(&self, shareholder: ShareholderId) -> Result<ProcessId> {
        let process = shareholder.process();
        if !self.view.contains(process) {
            return Err(InternalError::InvalidArgument(format!(
                "{shareholder} does not belong to the view"
            )));
        }
        Ok(process)
    }

    /// Encrypt a share value for `process`.
    pub fn encrypt_share_for<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        process: ProcessId,
        value: &Scalar,
    ) -> Result<Vec<u8>> {
        cipher::encrypt(
            rng,
            self.share_cipher,
            self.keys.key_for(process)?,
            &scalar_to_bytes(value),
        )
    }

    /// Decrypt a share value sent by `process`.
    pub fn decrypt_share(&self, process: ProcessId, encrypted: &[u8]) -> Result<Scalar> {
        let bytes = cipher::decrypt(self.share_cipher, self.keys.key_for(process)?, encrypted)?;
        scalar_from_bytes(&bytes)
    }

    /// Encrypt arbitrary data for `process`.
    pub fn encrypt_data_for<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        process: ProcessId,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        cipher::encrypt(rng, self.data_cipher, self.keys.key_for(process)?, data)
    }

    /// Decrypt data sent by `process`.
    pub fn decrypt_data(&self, process: ProcessId, encrypted: &[u8]) -> Result<Vec<u8>> {
        cipher::decrypt(self.data_cipher, self.keys.key_for(process)?, encrypted)
    }

    pub(crate) fn data_cipher(&self) -> CipherAlgorithm {
        self.data_cipher
    }
}

// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! A partial evaluation of the DPRF, together with a Chaum-Pedersen proof that
//! it was computed with the same `α_i` the public parameters commit to.

use super::parameters::{DprfPrivateParameters, DprfPublicParameters};
use crate::{
    errors::Result,
    protocol::ShareholderId,
    utils::{random_scalar, scalar_from_transcript, CurvePoint},
};
use k256::Scalar;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

/// One shareholder's proof-carrying partial evaluation for a target point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DprfContribution {
    pub(crate) of_shareholder: ShareholderId,
    pub(crate) for_shareholder: ShareholderId,
    pub(crate) partial: CurvePoint,
    pub(crate) proof: DleqProof,
}

impl DprfContribution {
    /// The shareholder that computed the contribution.
    pub fn of_shareholder(&self) -> ShareholderId {
        self.of_shareholder
    }

    /// The shareholder whose mask this contributes to.
    pub fn for_shareholder(&self) -> ShareholderId {
        self.for_shareholder
    }
}

/// Proof that `log_g(g^{α_i}) == log_{H(x)}(H(x)^{α_i})`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct DleqProof {
    c: Scalar,
    z: Scalar,
}

fn challenge(
    input: &CurvePoint,
    partial: &CurvePoint,
    share_commitment: &CurvePoint,
    input_nonce: &CurvePoint,
    generator_nonce: &CurvePoint,
) -> Scalar {
    let mut transcript = Transcript::new(b"DprfContribution");
    transcript.append_message(
        b"(H(x), g, H(x)^a, g^a)",
        &[
            input.to_bytes(),
            CurvePoint::GENERATOR.to_bytes(),
            partial.to_bytes(),
            share_commitment.to_bytes(),
        ]
        .concat(),
    );
    transcript.append_message(
        b"(H(x)^k, g^k)",
        &[input_nonce.to_bytes(), generator_nonce.to_bytes()].concat(),
    );
    scalar_from_transcript(&mut transcript, b"c")
}

impl DleqProof {
    pub(crate) fn prove<R: RngCore + CryptoRng>(
        rng: &mut R,
        input: &CurvePoint,
        partial: &CurvePoint,
        secret: &DprfPrivateParameters,
    ) -> Self {
        // A fresh nonce: the blinding value r travels in the clear, so using
        // it here would reveal the α-share.
        let k = random_scalar(rng);
        let share_commitment = CurvePoint::commit(&secret.alpha_share);
        let c = challenge(
            input,
            partial,
            &share_commitment,
            &input.multiply_by_scalar(&k),
            &CurvePoint::commit(&k),
        );
        let z = secret.alpha_share * c + k;
        Self { c, z }
    }

    pub(crate) fn verify(
        &self,
        input: &CurvePoint,
        partial: &CurvePoint,
        share_commitment: &CurvePoint,
    ) -> Result<()> {
        let input_nonce = input.multiply_by_scalar(&self.z) - partial.multiply_by_scalar(&self.c);
        let generator_nonce =
            CurvePoint::commit(&self.z) - share_commitment.multiply_by_scalar(&self.c);
        let c = challenge(input, partial, share_commitment, &input_nonce, &generator_nonce);
        if c != self.c {
            return verify_err!("Fiat-Shamir consistency check failed");
        }
        Ok(())
    }
}

impl DprfContribution {
    pub(crate) fn verify_against(
        &self,
        input: &CurvePoint,
        public: &DprfPublicParameters,
    ) -> Result<()> {
        let share_commitment = match public.share_commitment_of(self.of_shareholder) {
            Some(c) => c,
            None => return verify_err!("contribution from an unknown shareholder"),
        };
        self.proof.verify(input, &self.partial, share_commitment)
    }
}

// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Requests clients send to the replicated service and the responses they
//! get back.
//!
//! A request is split into a common part, ordered and seen by every replica,
//! and one private part per replica carrying that replica's encrypted shares.

use crate::{
    commitment::{Commitment, CommitmentKind, Share},
    errors::{InternalError, Result},
    protocol::{ProcessId, ShareholderId, View},
    serialization::{WireReader, WireWriter},
    utils::{scalar_from_bytes, sha256, CurvePoint},
    vssr::{
        ClientScheme, EncryptedShare, ServerScheme, VerifiableShare, VssrPublishedShares,
        VssrShare,
    },
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{instrument, trace};

/// What a request carries.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// An operation of a client, possibly with confidential data.
    Client,
    /// A message replicas exchange among themselves through the ordering
    /// layer.
    Application,
}

impl MessageType {
    fn tag(self) -> u8 {
        match self {
            MessageType::Client => 0,
            MessageType::Application => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(MessageType::Client),
            1 => Ok(MessageType::Application),
            _ => Err(InternalError::Serialization),
        }
    }
}

/// One confidential value held by a replica.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidentialData {
    share: VssrShare,
}

impl ConfidentialData {
    /// Wrap a share.
    pub fn new(share: VssrShare) -> Self {
        Self { share }
    }

    /// The wrapped share.
    pub fn share(&self) -> &VssrShare {
        &self.share
    }

    /// Whether both values share the same secret: same `r`, same payloads
    /// and commitments to the same polynomials. The share values themselves
    /// differ from replica to replica.
    pub fn is_same_secret(&self, other: &ConfidentialData) -> bool {
        self.content_digest() == other.content_digest()
    }

    /// A digest of the replica-independent content.
    pub fn content_digest(&self) -> [u8; 32] {
        let mut parts: Vec<Vec<u8>> = vec![self.share.r().to_bytes().to_vec()];
        for slot in self.share.verifiable_shares() {
            match slot {
                Some(share) => {
                    parts.push(vec![1]);
                    parts.push(sha256(&[share.shared_data().unwrap_or_default()]).to_vec());
                    parts.push(share.commitment().consistent_hash().to_vec());
                }
                None => parts.push(vec![0]),
            }
        }
        let parts: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
        sha256(&parts)
    }
}

/// A decoded request, as stored in the log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    message_type: MessageType,
    plain_data: Option<Vec<u8>>,
    shares: Vec<ConfidentialData>,
}

impl Request {
    /// A request with only public data.
    pub fn new(message_type: MessageType, plain_data: Option<Vec<u8>>) -> Self {
        Self {
            message_type,
            plain_data,
            shares: Vec::new(),
        }
    }

    /// A client request with confidential data.
    pub fn with_shares(plain_data: Option<Vec<u8>>, shares: Vec<ConfidentialData>) -> Self {
        Self {
            message_type: MessageType::Client,
            plain_data,
            shares,
        }
    }

    /// The kind of request.
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// The public data.
    pub fn plain_data(&self) -> Option<&[u8]> {
        self.plain_data.as_deref()
    }

    /// The confidential values, in request order.
    pub fn shares(&self) -> &[ConfidentialData] {
        &self.shares
    }

    pub(crate) fn shares_mut(&mut self) -> &mut Vec<ConfidentialData> {
        &mut self.shares
    }

    /// Serialize for the log.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serialize!(self)
    }

    /// Inverse of [`Request::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        deserialize!(bytes)
    }

    /// Decode the request `sender` submitted, extracting this replica's
    /// shares from the private part.
    #[instrument(skip_all, err(Debug))]
    pub fn decode(
        scheme: &ServerScheme,
        sender: ProcessId,
        common: &[u8],
        private: Option<&[u8]>,
    ) -> Result<Self> {
        let me = scheme.me();
        let kind = scheme.commitment_scheme().kind();
        let mut reader = WireReader::new(common);
        let message_type = MessageType::from_tag(reader.u8()?)?;
        let plain_data = reader.optional_bytes()?;
        if message_type == MessageType::Application {
            reader.finish()?;
            return Ok(Self::new(message_type, plain_data));
        }

        let count = reader.count()?;
        let mut private = WireReader::new(private.unwrap_or_default());
        let mut shares = Vec::with_capacity(count);
        for _ in 0..count {
            let r = scalar_from_bytes(&reader.bytes()?)?;
            let shared_data = reader.optional_bytes()?.unwrap_or_default();
            let polynomials = reader.count()?;
            let expected = scheme.view().blocks() + 1;
            if polynomials != expected {
                return arg_err!(format!("expected {expected} polynomials, got {polynomials}"));
            }
            let mut commitments = Vec::with_capacity(polynomials);
            let mut encrypted = Vec::with_capacity(polynomials);
            for _ in 0..polynomials {
                let public: Commitment = deserialize!(&reader.bytes()?)?;
                let commitment = match kind {
                    CommitmentKind::Linear => public,
                    CommitmentKind::Constant => {
                        let witness: CurvePoint = deserialize!(&private.bytes()?)?;
                        public.with_witness(me, witness)
                    }
                };
                commitments.push(commitment);
                let share = private.optional_bytes()?.ok_or_else(|| {
                    InternalError::InvalidArgument("request lacks an encrypted share".into())
                })?;
                encrypted.push(vec![EncryptedShare {
                    shareholder: me,
                    encrypted: share,
                }]);
            }
            let published = VssrPublishedShares {
                r,
                shares: encrypted,
                commitments,
                shared_data,
            };
            shares.push(ConfidentialData::new(scheme.extract_share(sender, &published)?));
        }
        reader.finish()?;
        private.finish()?;
        trace!("Decoded request of {} with {} secrets", sender, shares.len());
        Ok(Self::with_shares(plain_data, shares))
    }
}

/// A client request ready to be handed to the ordering layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientRequest {
    common: Vec<u8>,
    private: BTreeMap<ProcessId, Vec<u8>>,
}

impl ClientRequest {
    /// Share each of `confidential` and encode the request.
    pub fn new<R: RngCore + CryptoRng>(
        rng: &mut R,
        scheme: &ClientScheme,
        plain_data: Option<&[u8]>,
        confidential: &[&[u8]],
    ) -> Result<Self> {
        let published = confidential
            .iter()
            .map(|secret| scheme.share(rng, secret))
            .collect::<Result<Vec<_>>>()?;
        Self::encode(scheme.view(), plain_data, &published)
    }

    /// Encode already shared secrets.
    pub fn encode(
        view: &View,
        plain_data: Option<&[u8]>,
        published: &[VssrPublishedShares],
    ) -> Result<Self> {
        let mut common = WireWriter::new();
        common.u8(MessageType::Client.tag());
        common.optional_bytes(plain_data)?;
        common.count(published.len())?;
        for secret in published {
            common.bytes(&secret.r.to_bytes())?;
            common.optional_bytes(Some(&secret.shared_data))?;
            common.count(secret.commitments.len())?;
            for commitment in &secret.commitments {
                common.bytes(&serialize!(&commitment.public_part())?)?;
            }
        }

        let mut private = BTreeMap::new();
        if !published.is_empty() {
            for process in view.processes() {
                let shareholder = ShareholderId::from_process(*process);
                let mut writer = WireWriter::new();
                for secret in published {
                    let shares = secret.share_of(shareholder).ok_or_else(|| {
                        InternalError::InvalidArgument(format!("no share for {shareholder}"))
                    })?;
                    for (index, share) in shares.iter().enumerate() {
                        if let Some(witness) = secret.witness_of(index, shareholder) {
                            writer.bytes(&serialize!(&witness)?)?;
                        }
                        writer.optional_bytes(Some(&share.encrypted))?;
                    }
                }
                let _ = private.insert(*process, writer.into_bytes());
            }
        }
        Ok(Self {
            common: common.into_bytes(),
            private,
        })
    }

    /// A request between replicas, with public data only.
    pub fn application(plain_data: &[u8]) -> Result<Self> {
        let mut common = WireWriter::new();
        common.u8(MessageType::Application.tag());
        common.optional_bytes(Some(plain_data))?;
        Ok(Self {
            common: common.into_bytes(),
            private: BTreeMap::new(),
        })
    }

    /// The part every replica orders.
    pub fn common(&self) -> &[u8] {
        &self.common
    }

    /// The part addressed to `process`.
    pub fn private_for(&self, process: ProcessId) -> Option<&[u8]> {
        self.private.get(&process).map(Vec::as_slice)
    }

    /// Whether replicas should verify the shares before ordering.
    pub fn needs_verification(&self) -> bool {
        !self.private.is_empty()
    }
}

/// A server's answer, with the main shares of any returned secret in the
/// clear. Used when the client channel is already encrypted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidentialMessage {
    plain_data: Option<Vec<u8>>,
    shares: Vec<VerifiableShare>,
}

/// A main share encrypted for the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedVerifiableShare {
    pub(crate) shareholder: ShareholderId,
    pub(crate) encrypted: Vec<u8>,
    pub(crate) commitment: Commitment,
    pub(crate) shared_data: Option<Vec<u8>>,
}

/// A server's answer with the returned main shares encrypted for the
/// requesting client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedConfidentialMessage {
    plain_data: Option<Vec<u8>>,
    shares: Vec<EncryptedVerifiableShare>,
}

impl ConfidentialMessage {
    /// A response carrying `plain_data` and the main shares of `shares`.
    pub fn new(plain_data: Option<Vec<u8>>, shares: &[ConfidentialData]) -> Result<Self> {
        Ok(Self {
            plain_data,
            shares: shares
                .iter()
                .map(|s| s.share().main().cloned())
                .collect::<Result<_>>()?,
        })
    }

    /// The public data.
    pub fn plain_data(&self) -> Option<&[u8]> {
        self.plain_data.as_deref()
    }

    /// The main shares.
    pub fn shares(&self) -> &[VerifiableShare] {
        &self.shares
    }

    /// Encrypt every share for `client`.
    pub fn encrypt_for<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        scheme: &ServerScheme,
        client: ProcessId,
    ) -> Result<EncryptedConfidentialMessage> {
        let shares = self
            .shares
            .iter()
            .map(|s| {
                Ok(EncryptedVerifiableShare {
                    shareholder: s.share().shareholder(),
                    encrypted: scheme.encrypt_share_for(rng, client, s.share().value())?,
                    commitment: s.commitment().clone(),
                    shared_data: s.shared_data().map(<[u8]>::to_vec),
                })
            })
            .collect::<Result<_>>()?;
        Ok(EncryptedConfidentialMessage {
            plain_data: self.plain_data.clone(),
            shares,
        })
    }

    /// Serialize for the client.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serialize!(self)
    }

    /// Inverse of [`ConfidentialMessage::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        deserialize!(bytes)
    }
}

impl EncryptedConfidentialMessage {
    /// The public data.
    pub fn plain_data(&self) -> Option<&[u8]> {
        self.plain_data.as_deref()
    }

    /// Decrypt the shares with the key shared with `server`.
    pub fn decrypt(&self, scheme: &ClientScheme, server: ProcessId) -> Result<ConfidentialMessage> {
        let shares = self
            .shares
            .iter()
            .map(|s| {
                let value = scheme.decrypt_share(server, &s.encrypted)?;
                Ok(VerifiableShare::new(
                    Share::new(s.shareholder, value),
                    s.commitment.clone(),
                    s.shared_data.clone(),
                ))
            })
            .collect::<Result<_>>()?;
        Ok(ConfidentialMessage {
            plain_data: self.plain_data.clone(),
            shares,
        })
    }

    /// Serialize for the client.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serialize!(self)
    }

    /// Inverse of [`EncryptedConfidentialMessage::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        deserialize!(bytes)
    }
}

// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Client-side handling of replica responses.

use crate::{
    errors::{InternalError, Result},
    messages::{ConfidentialMessage, EncryptedConfidentialMessage},
    protocol::ProcessId,
    utils::sha256,
    vssr::{ClientScheme, OpenPublishedShares, VerifiableShare},
};
use std::collections::BTreeMap;
use tracing::{debug, error, warn};

/// What the client learns from a quorum of matching responses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedResponse {
    /// The public part of the response.
    pub plain_data: Option<Vec<u8>>,
    /// Every returned secret, in response order.
    pub secrets: Vec<Vec<u8>>,
}

/// Groups responses by content and opens the secrets once enough of them
/// agree.
#[derive(Debug)]
pub struct ResponseExtractor<'a> {
    scheme: &'a ClientScheme,
    same_content: usize,
}

/// A digest of what must be identical across replicas: the public data and,
/// per secret, its payload and the commitment its share verifies against.
fn content_digest(message: &ConfidentialMessage) -> [u8; 32] {
    let mut parts: Vec<Vec<u8>> = Vec::with_capacity(2 + 2 * message.shares().len());
    match message.plain_data() {
        Some(plain) => {
            parts.push(vec![1]);
            parts.push(plain.to_vec());
        }
        None => parts.push(vec![0]),
    }
    for share in message.shares() {
        parts.push(sha256(&[share.shared_data().unwrap_or_default()]).to_vec());
        parts.push(share.commitment().consistent_hash().to_vec());
    }
    let parts: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
    sha256(&parts)
}

impl<'a> ResponseExtractor<'a> {
    /// An extractor acting once `same_content` responses match.
    pub fn new(scheme: &'a ClientScheme, same_content: usize) -> Self {
        Self {
            scheme,
            same_content,
        }
    }

    /// Decrypt each replica's shares with the key shared with that replica,
    /// then extract as [`ResponseExtractor::extract`] does. Responses that do
    /// not decrypt are dropped.
    pub fn extract_encrypted(
        &self,
        responses: &[(ProcessId, EncryptedConfidentialMessage)],
    ) -> Result<ExtractedResponse> {
        let decrypted: Vec<_> = responses
            .iter()
            .filter_map(|(server, response)| match response.decrypt(self.scheme, *server) {
                Ok(message) => Some((*server, message)),
                Err(e) => {
                    warn!("Dropping response of {}: {:?}", server, e);
                    None
                }
            })
            .collect();
        self.extract(&decrypted)
    }

    /// Find `same_content` responses agreeing on their content and combine
    /// the main shares they carry.
    pub fn extract(&self, responses: &[(ProcessId, ConfidentialMessage)]) -> Result<ExtractedResponse> {
        let mut groups: BTreeMap<[u8; 32], Vec<&ConfidentialMessage>> = BTreeMap::new();
        for (server, response) in responses {
            let digest = content_digest(response);
            debug!("Response from {} with digest {}", server, hex::encode(digest));
            groups.entry(digest).or_default().push(response);
        }
        let agreeing = groups
            .values()
            .find(|group| group.len() >= self.same_content)
            .ok_or_else(|| {
                error!("Did not find {} equivalent responses", self.same_content);
                InternalError::NotEnoughContributions {
                    needed: self.same_content,
                    got: groups.values().map(Vec::len).max().unwrap_or(0),
                }
            })?;
        let first = agreeing.first().ok_or(InternalError::InternalInvariantFailed)?;

        let secrets = (0..first.shares().len())
            .map(|index| {
                let shares: Vec<VerifiableShare> = agreeing
                    .iter()
                    .filter_map(|m| m.shares().get(index).cloned())
                    .collect();
                let open = OpenPublishedShares::from_main_shares(&shares)?;
                self.scheme.combine(&open)
            })
            .collect::<Result<_>>()?;
        Ok(ExtractedResponse {
            plain_data: first.plain_data().map(<[u8]>::to_vec),
            secrets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        commitment::CommitmentKind,
        messages::ConfidentialData,
        vssr::testing::{Fixture, CLIENT},
    };
    use rand::rngs::OsRng;

    fn responses(
        fixture: &Fixture,
        secret: &[u8],
        plain: &[u8],
    ) -> Result<Vec<(ProcessId, EncryptedConfidentialMessage)>> {
        let shares = fixture.share(secret)?;
        fixture
            .servers
            .iter()
            .zip(shares)
            .map(|(server, share)| {
                let message =
                    ConfidentialMessage::new(Some(plain.to_vec()), &[ConfidentialData::new(share)])?;
                Ok((
                    server.me().process(),
                    message.encrypt_for(&mut OsRng, server, CLIENT)?,
                ))
            })
            .collect()
    }

    #[test]
    fn matching_responses_open_the_secret() -> Result<()> {
        let fixture = Fixture::new(1, CommitmentKind::Constant)?;
        let responses = responses(&fixture, b"the value", b"get")?;
        let extractor = ResponseExtractor::new(&fixture.client, 2);
        let extracted = extractor.extract_encrypted(&responses[1..3])?;
        assert_eq!(extracted.plain_data.as_deref(), Some(&b"get"[..]));
        assert_eq!(extracted.secrets, vec![b"the value".to_vec()]);
        Ok(())
    }

    #[test]
    fn diverging_responses_are_not_combined() -> Result<()> {
        let fixture = Fixture::new(1, CommitmentKind::Linear)?;
        let mut mixed = responses(&fixture, b"value", b"get")?;
        let other = responses(&fixture, b"value", b"got")?;
        mixed.truncate(1);
        mixed.push(other[1].clone());
        let extractor = ResponseExtractor::new(&fixture.client, 2);
        assert!(matches!(
            extractor.extract_encrypted(&mixed),
            Err(InternalError::NotEnoughContributions { needed: 2, got: 1 })
        ));
        Ok(())
    }
}

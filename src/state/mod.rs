// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! The confidential application state of a replica: a snapshot taken at the
//! last checkpoint plus the batches of requests ordered since.
//!
//! [`separation`] splits such a state into public structure and the shares
//! it holds, and puts it back together after a transfer.

mod log;
pub mod separation;

pub use log::ConfidentialStateLog;

use crate::{
    errors::Result,
    messages::{ConfidentialData, Request},
    serialization::{WireReader, WireWriter},
};
use serde::{Deserialize, Serialize};

/// Consensus id used before the first decision.
pub const NO_CONSENSUS: i32 = -1;

/// What the ordering layer reports about one ordered request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContext {
    /// The client that sent the request.
    pub sender: u32,
    /// View in which the request was ordered.
    pub view_id: i32,
    /// Client session.
    pub session: i32,
    /// Client sequence number within the session.
    pub sequence: i32,
    /// Client operation id.
    pub operation_id: i32,
    /// Replica chosen to send the full reply, or -1.
    pub reply_server: i32,
    /// Client signature over the request, if signed.
    pub signature: Option<Vec<u8>>,
    /// Timestamp agreed by the ordering layer.
    pub timestamp: i64,
    /// Regency of the leader that proposed the batch.
    pub regency: i32,
    /// The proposing leader.
    pub leader: i32,
    /// The consensus instance that ordered the request.
    pub consensus_id: i32,
    /// Agreed seed for deterministic randomness.
    pub seed: i64,
    /// Opaque metadata attached by the client.
    pub metadata: Option<Vec<u8>>,
    /// Whether this is the last request of its batch.
    pub last_in_batch: bool,
    /// Whether the decision carried no client requests.
    pub no_op: bool,
}

impl MessageContext {
    pub(crate) fn write(&self, out: &mut WireWriter) -> Result<()> {
        out.u32(self.sender)
            .i32(self.view_id)
            .i32(self.session)
            .i32(self.sequence)
            .i32(self.operation_id)
            .i32(self.reply_server);
        out.optional_bytes(self.signature.as_deref())?;
        out.i64(self.timestamp)
            .i32(self.regency)
            .i32(self.leader)
            .i32(self.consensus_id)
            .i64(self.seed);
        out.optional_bytes(self.metadata.as_deref())?;
        out.bool(self.last_in_batch).bool(self.no_op);
        Ok(())
    }

    pub(crate) fn read(input: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            sender: input.u32()?,
            view_id: input.i32()?,
            session: input.i32()?,
            sequence: input.i32()?,
            operation_id: input.i32()?,
            reply_server: input.i32()?,
            signature: input.optional_bytes()?,
            timestamp: input.i64()?,
            regency: input.i32()?,
            leader: input.i32()?,
            consensus_id: input.i32()?,
            seed: input.i64()?,
            metadata: input.optional_bytes()?,
            last_in_batch: input.bool()?,
            no_op: input.bool()?,
        })
    }
}

/// A logged command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Bytes that did not decode as a request.
    Plain(Vec<u8>),
    /// A decoded request, with this replica's shares.
    Confidential(Request),
}

/// The commands ordered by one consensus instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBatch {
    pub(crate) consensus_id: i32,
    pub(crate) commands: Vec<Command>,
    pub(crate) contexts: Vec<MessageContext>,
}

impl CommandBatch {
    /// A batch decided in `consensus_id`. `commands[i]` was ordered with
    /// `contexts[i]`.
    pub fn new(consensus_id: i32, commands: Vec<Command>, contexts: Vec<MessageContext>) -> Self {
        Self {
            consensus_id,
            commands,
            contexts,
        }
    }

    /// The deciding consensus instance.
    pub fn consensus_id(&self) -> i32 {
        self.consensus_id
    }

    /// The commands, in order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// One context per command.
    pub fn contexts(&self) -> &[MessageContext] {
        &self.contexts
    }

    /// Whether the batch was a no-op decision.
    pub fn is_no_op(&self) -> bool {
        self.contexts.first().map_or(false, |c| c.no_op)
    }
}

/// A checkpoint of the application: public data plus the confidential
/// values the application holds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidentialSnapshot {
    plain_data: Option<Vec<u8>>,
    shares: Vec<ConfidentialData>,
}

impl ConfidentialSnapshot {
    /// Build a snapshot.
    pub fn new(plain_data: Option<Vec<u8>>, shares: Vec<ConfidentialData>) -> Self {
        Self { plain_data, shares }
    }

    /// The public part.
    pub fn plain_data(&self) -> Option<&[u8]> {
        self.plain_data.as_deref()
    }

    /// The confidential values.
    pub fn shares(&self) -> &[ConfidentialData] {
        &self.shares
    }

    /// Serialize with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serialize!(self)
    }

    /// Inverse of [`ConfidentialSnapshot::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        deserialize!(bytes)
    }
}

/// A replica's state up to some consensus id, as handed to a recovering
/// replica.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationState {
    pub(crate) last_checkpoint_cid: i32,
    pub(crate) last_cid: i32,
    pub(crate) batches: Option<Vec<CommandBatch>>,
    pub(crate) snapshot: Option<ConfidentialSnapshot>,
}

impl ApplicationState {
    /// A state covering `last_checkpoint_cid + 1 ..= last_cid` through
    /// `batches`, on top of `snapshot`.
    pub fn new(
        last_checkpoint_cid: i32,
        last_cid: i32,
        batches: Option<Vec<CommandBatch>>,
        snapshot: Option<ConfidentialSnapshot>,
    ) -> Self {
        Self {
            last_checkpoint_cid,
            last_cid,
            batches,
            snapshot,
        }
    }

    /// A state with nothing in it.
    pub fn empty() -> Self {
        Self::new(NO_CONSENSUS, NO_CONSENSUS, None, None)
    }

    /// The consensus id of the snapshot.
    pub fn last_checkpoint_cid(&self) -> i32 {
        self.last_checkpoint_cid
    }

    /// The last consensus id covered.
    pub fn last_cid(&self) -> i32 {
        self.last_cid
    }

    /// The logged batches, oldest first.
    pub fn batches(&self) -> &[CommandBatch] {
        self.batches.as_deref().unwrap_or_default()
    }

    /// The checkpoint snapshot, if sent.
    pub fn snapshot(&self) -> Option<&ConfidentialSnapshot> {
        self.snapshot.as_ref()
    }

    /// Whether the state carries neither a snapshot nor batches.
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_none() && self.batches().is_empty()
    }

    /// The number of confidential values in the state.
    pub fn confidential_items(&self) -> usize {
        let logged: usize = self
            .batches()
            .iter()
            .flat_map(|b| &b.commands)
            .map(|c| match c {
                Command::Confidential(r) => r.shares().len(),
                Command::Plain(_) => 0,
            })
            .sum();
        logged + self.snapshot.as_ref().map_or(0, |s| s.shares.len())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::{
        messages::MessageType,
        vssr::testing::Fixture,
    };

    pub(crate) fn context(consensus_id: i32, sequence: i32, last_in_batch: bool) -> MessageContext {
        MessageContext {
            sender: 1000,
            session: 7,
            sequence,
            consensus_id,
            timestamp: 1_700_000_000,
            signature: (sequence % 2 == 0).then(|| vec![sequence as u8; 4]),
            last_in_batch,
            ..MessageContext::default()
        }
    }

    /// One state per server: a snapshot with one secret and two batches,
    /// the first carrying a secret and an application message.
    pub(crate) fn states(fixture: &Fixture) -> Result<Vec<ApplicationState>> {
        let in_snapshot = fixture.share(b"snapshot secret")?;
        let first = fixture.share(b"first logged secret")?;
        let second = fixture.share(b"second logged secret")?;
        Ok(in_snapshot
            .into_iter()
            .zip(first)
            .zip(second)
            .map(|((snap, first), second)| {
                let snapshot = ConfidentialSnapshot::new(
                    Some(b"map".to_vec()),
                    vec![ConfidentialData::new(snap)],
                );
                let batches = vec![
                    CommandBatch::new(
                        5,
                        vec![
                            Command::Confidential(Request::with_shares(
                                Some(b"put a".to_vec()),
                                vec![ConfidentialData::new(first)],
                            )),
                            Command::Confidential(Request::new(
                                MessageType::Application,
                                Some(b"ping".to_vec()),
                            )),
                        ],
                        vec![context(5, 0, false), context(5, 1, true)],
                    ),
                    CommandBatch::new(
                        6,
                        vec![
                            Command::Plain(b"garbage".to_vec()),
                            Command::Confidential(Request::with_shares(
                                None,
                                vec![ConfidentialData::new(second)],
                            )),
                        ],
                        vec![context(6, 2, false), context(6, 3, true)],
                    ),
                ];
                ApplicationState::new(4, 6, Some(batches), Some(snapshot))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{commitment::CommitmentKind, vssr::testing::Fixture};

    #[test]
    fn contexts_survive_the_wire() -> Result<()> {
        let ctx = testing::context(3, 2, true);
        let mut out = WireWriter::new();
        ctx.write(&mut out)?;
        let bytes = out.into_bytes();
        let mut input = WireReader::new(&bytes);
        assert_eq!(MessageContext::read(&mut input)?, ctx);
        input.finish()
    }

    #[test]
    fn states_count_their_confidential_items() -> Result<()> {
        let fixture = Fixture::new(1, CommitmentKind::Linear)?;
        let states = testing::states(&fixture)?;
        assert_eq!(states[0].confidential_items(), 3);
        assert!(!states[0].is_empty());
        assert!(ApplicationState::empty().is_empty());

        let snapshot = states[1].snapshot().cloned().unwrap_or_default();
        assert_eq!(ConfidentialSnapshot::from_bytes(&snapshot.to_bytes()?)?, snapshot);
        Ok(())
    }
}

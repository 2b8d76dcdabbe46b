// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Splitting an [`ApplicationState`] into its public structure and the
//! shares it holds.
//!
//! The structure is a "common state" byte stream that is identical on every
//! correct replica. Each confidential value is replaced in it by its shared
//! data, and its share is appended to a flat list in traversal order.
//! [`reconstruct`] walks the stream again and consumes one share per
//! placeholder, in the same order.

use super::{ApplicationState, Command, CommandBatch, ConfidentialSnapshot, MessageContext};
use crate::{
    errors::{InternalError, Result},
    messages::{ConfidentialData, Request},
    serialization::{WireReader, WireWriter},
    vssr::VssrShare,
};
use tracing::{info, instrument};

/// A state split for transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeparatedState {
    /// The public structure.
    pub common_state: Vec<u8>,
    /// The shares, in traversal order.
    pub shares: Vec<VssrShare>,
}

fn separate_shares(
    shares: &[ConfidentialData],
    out: &mut WireWriter,
    collected: &mut Vec<VssrShare>,
) -> Result<()> {
    for data in shares {
        let main = data.share().main()?;
        out.optional_bytes(main.shared_data())?;
        collected.push(data.share().clone());
    }
    Ok(())
}

fn separate_batch(
    batch: &CommandBatch,
    out: &mut WireWriter,
    collected: &mut Vec<VssrShare>,
) -> Result<()> {
    out.i32(batch.consensus_id);
    out.count(batch.contexts.len())?;
    for context in &batch.contexts {
        context.write(out)?;
    }
    out.count(batch.commands.len())?;
    for command in &batch.commands {
        match command {
            Command::Plain(bytes) => {
                out.i32(-1).bytes(bytes)?;
            }
            Command::Confidential(request) => {
                out.count(request.shares().len())?;
                separate_shares(request.shares(), out, collected)?;
                let mut stripped = request.clone();
                stripped.shares_mut().clear();
                out.bytes(&stripped.to_bytes()?)?;
            }
        }
    }
    Ok(())
}

/// Split `state` into common state and shares.
#[instrument(skip_all, err(Debug))]
pub fn separate(state: &ApplicationState) -> Result<SeparatedState> {
    let mut out = WireWriter::new();
    let mut shares = Vec::with_capacity(state.confidential_items());
    out.i32(state.last_checkpoint_cid).i32(state.last_cid);
    match &state.batches {
        Some(batches) => {
            out.count(batches.len())?;
            for batch in batches {
                separate_batch(batch, &mut out, &mut shares)?;
            }
        }
        None => {
            out.i32(-1);
        }
    }
    match &state.snapshot {
        Some(snapshot) => {
            out.bool(true);
            out.optional_bytes(snapshot.plain_data())?;
            out.count(snapshot.shares().len())?;
            separate_shares(snapshot.shares(), &mut out, &mut shares)?;
        }
        None => {
            out.bool(false);
        }
    }
    let common_state = out.into_bytes();
    info!(
        "Separated state into {} bytes of common state and {} shares",
        common_state.len(),
        shares.len()
    );
    Ok(SeparatedState {
        common_state,
        shares,
    })
}

/// Hands out recovered shares in traversal order.
struct Placeholders<I: Iterator<Item = VssrShare>> {
    shares: I,
    used: usize,
}

impl<I: Iterator<Item = VssrShare>> Placeholders<I> {
    fn fill(&mut self, shared_data: Option<Vec<u8>>) -> Result<ConfidentialData> {
        let mut share = self.shares.next().ok_or_else(|| {
            InternalError::InvalidArgument(format!(
                "common state holds more than {} confidential values",
                self.used
            ))
        })?;
        share.main_mut()?.set_shared_data(shared_data);
        self.used += 1;
        Ok(ConfidentialData::new(share))
    }

    fn fill_all(&mut self, input: &mut WireReader<'_>, count: usize) -> Result<Vec<ConfidentialData>> {
        let shared: Vec<_> = (0..count)
            .map(|_| input.optional_bytes())
            .collect::<Result<_>>()?;
        shared.into_iter().map(|data| self.fill(data)).collect()
    }
}

fn read_batch<I: Iterator<Item = VssrShare>>(
    input: &mut WireReader<'_>,
    placeholders: &mut Placeholders<I>,
) -> Result<CommandBatch> {
    let consensus_id = input.i32()?;
    let contexts = (0..input.count()?)
        .map(|_| MessageContext::read(input))
        .collect::<Result<_>>()?;
    let count = input.count()?;
    let mut commands = Vec::with_capacity(count);
    for _ in 0..count {
        let shares = input.i32()?;
        if shares < 0 {
            commands.push(Command::Plain(input.bytes()?));
            continue;
        }
        let shares = usize::try_from(shares).map_err(|_| InternalError::Serialization)?;
        let data = placeholders.fill_all(input, shares)?;
        let mut request = Request::from_bytes(&input.bytes()?)?;
        request.shares_mut().extend(data);
        commands.push(Command::Confidential(request));
    }
    Ok(CommandBatch::new(consensus_id, commands, contexts))
}

/// Rebuild a state from its common state and the shares recovered for it,
/// given in traversal order. Fails unless there is exactly one share per
/// placeholder.
#[instrument(skip_all, err(Debug))]
pub fn reconstruct(
    common_state: &[u8],
    shares: impl IntoIterator<Item = VssrShare>,
) -> Result<ApplicationState> {
    let mut input = WireReader::new(common_state);
    let mut placeholders = Placeholders {
        shares: shares.into_iter(),
        used: 0,
    };
    let last_checkpoint_cid = input.i32()?;
    let last_cid = input.i32()?;
    let batches = match input.i32()? {
        -1 => None,
        count => {
            let count = usize::try_from(count).map_err(|_| InternalError::Serialization)?;
            Some(
                (0..count)
                    .map(|_| read_batch(&mut input, &mut placeholders))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
    };
    let snapshot = if input.bool()? {
        let plain_data = input.optional_bytes()?;
        let count = input.count()?;
        let shares = placeholders.fill_all(&mut input, count)?;
        Some(ConfidentialSnapshot::new(plain_data, shares))
    } else {
        None
    };
    input.finish()?;
    if placeholders.shares.next().is_some() {
        return arg_err!("more shares than confidential values in the common state");
    }
    Ok(ApplicationState::new(
        last_checkpoint_cid,
        last_cid,
        batches,
        snapshot,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{commitment::CommitmentKind, state::testing, vssr::testing::Fixture};

    #[test]
    fn separated_states_reassemble() -> Result<()> {
        let fixture = Fixture::new(1, CommitmentKind::Linear)?;
        let states = testing::states(&fixture)?;
        let separated: Vec<_> = states.iter().map(separate).collect::<Result<_>>()?;

        // The structure is the same on every replica; the shares are not.
        assert!(separated.iter().all(|s| s.common_state == separated[0].common_state));
        assert_ne!(separated[0].shares, separated[1].shares);
        assert_eq!(separated[2].shares.len(), 3);

        let rebuilt = reconstruct(&separated[2].common_state, separated[2].shares.clone())?;
        assert_eq!(rebuilt, states[2]);
        Ok(())
    }

    #[test]
    fn shared_data_comes_from_the_common_state() -> Result<()> {
        let fixture = Fixture::new(1, CommitmentKind::Constant)?;
        let states = testing::states(&fixture)?;
        let separated = separate(&states[0])?;
        let stripped: Vec<_> = separated
            .shares
            .iter()
            .cloned()
            .map(|mut s| {
                s.main_mut()?.set_shared_data(None);
                Ok(s)
            })
            .collect::<Result<_>>()?;
        assert_eq!(reconstruct(&separated.common_state, stripped)?, states[0]);
        Ok(())
    }

    #[test]
    fn share_count_must_match_placeholders() -> Result<()> {
        let fixture = Fixture::new(1, CommitmentKind::Linear)?;
        let states = testing::states(&fixture)?;
        let mut separated = separate(&states[0])?;
        let extra = separated.shares[0].clone();
        separated.shares.push(extra);
        assert!(reconstruct(&separated.common_state, separated.shares.clone()).is_err());
        let _ = separated.shares.pop();
        let _ = separated.shares.pop();
        assert!(reconstruct(&separated.common_state, separated.shares).is_err());

        assert!(separate(&ApplicationState::empty())
            .and_then(|s| reconstruct(&s.common_state, s.shares))?
            .is_empty());
        Ok(())
    }
}

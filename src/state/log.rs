// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use super::{ApplicationState, CommandBatch, ConfidentialSnapshot, NO_CONSENSUS};
use crate::errors::{InternalError, Result};
use tracing::{info, warn};

/// In-memory log of the batches decided since the last checkpoint.
///
/// With a checkpoint period of `k`, at most `k - 1` batches sit between two
/// checkpoints.
#[derive(Clone, Debug)]
pub struct ConfidentialStateLog {
    batches: Vec<CommandBatch>,
    capacity: usize,
    last_checkpoint_cid: i32,
    last_cid: i32,
    snapshot: ConfidentialSnapshot,
}

impl ConfidentialStateLog {
    /// An empty log on top of `initial`.
    pub fn new(checkpoint_period: usize, initial: ConfidentialSnapshot) -> Result<Self> {
        if checkpoint_period < 2 {
            return Err(InternalError::Configuration(format!(
                "checkpoint period must be at least 2, got {checkpoint_period}"
            )));
        }
        Ok(Self {
            batches: Vec::with_capacity(checkpoint_period - 1),
            capacity: checkpoint_period - 1,
            last_checkpoint_cid: NO_CONSENSUS,
            last_cid: NO_CONSENSUS,
            snapshot: initial,
        })
    }

    /// Replace the snapshot and drop every logged batch.
    pub fn new_checkpoint(&mut self, snapshot: ConfidentialSnapshot, consensus_id: i32) {
        self.batches.clear();
        self.snapshot = snapshot;
        self.last_checkpoint_cid = consensus_id;
        self.last_cid = consensus_id;
    }

    /// Append a batch. Returns `false` if the log is full.
    pub fn add_batch(&mut self, batch: CommandBatch) -> bool {
        if self.batches.len() >= self.capacity {
            warn!(
                "Log is full, dropping batch of consensus {}",
                batch.consensus_id
            );
            return false;
        }
        self.last_cid = batch.consensus_id;
        self.batches.push(batch);
        true
    }

    /// The batch decided in `consensus_id`, if logged.
    pub fn batch(&self, consensus_id: i32) -> Option<&CommandBatch> {
        if consensus_id <= self.last_checkpoint_cid || consensus_id > self.last_cid {
            return None;
        }
        self.batches
            .iter()
            .find(|batch| batch.consensus_id == consensus_id)
    }

    /// The logged batches.
    pub fn batches(&self) -> &[CommandBatch] {
        &self.batches
    }

    /// The consensus id of the current snapshot.
    pub fn last_checkpoint_cid(&self) -> i32 {
        self.last_checkpoint_cid
    }

    /// The last logged consensus id.
    pub fn last_cid(&self) -> i32 {
        self.last_cid
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> &ConfidentialSnapshot {
        &self.snapshot
    }

    /// The state up to `consensus_id`, with the snapshot if `with_snapshot`.
    /// `None` if `consensus_id` is outside the logged range.
    pub fn application_state(
        &self,
        consensus_id: i32,
        with_snapshot: bool,
    ) -> Option<ApplicationState> {
        info!(
            "CID requested: {}. Last checkpoint: {}. Last CID: {}",
            consensus_id, self.last_checkpoint_cid, self.last_cid
        );
        if consensus_id < self.last_checkpoint_cid || consensus_id > self.last_cid {
            return None;
        }
        let batches = (consensus_id > self.last_checkpoint_cid).then(|| {
            self.batches
                .iter()
                .take_while(|batch| batch.consensus_id <= consensus_id)
                .cloned()
                .collect()
        });
        Some(ApplicationState::new(
            self.last_checkpoint_cid,
            consensus_id,
            batches,
            with_snapshot.then(|| self.snapshot.clone()),
        ))
    }

    /// Adopt a transferred state.
    pub fn update(&mut self, state: &ApplicationState) {
        self.batches.clear();
        for batch in state.batches().iter().take(self.capacity) {
            self.batches.push(batch.clone());
        }
        self.last_checkpoint_cid = state.last_checkpoint_cid;
        self.last_cid = self
            .batches
            .iter()
            .map(|b| b.consensus_id)
            .fold(state.last_checkpoint_cid, i32::max);
        if let Some(snapshot) = &state.snapshot {
            self.snapshot = snapshot.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{testing::context, Command};

    fn batch(consensus_id: i32) -> CommandBatch {
        CommandBatch::new(
            consensus_id,
            vec![Command::Plain(vec![consensus_id as u8])],
            vec![context(consensus_id, consensus_id, true)],
        )
    }

    #[test]
    fn batches_are_addressed_by_consensus_id() -> Result<()> {
        let mut log = ConfidentialStateLog::new(4, ConfidentialSnapshot::default())?;
        log.new_checkpoint(ConfidentialSnapshot::new(Some(vec![1]), vec![]), 8);
        assert!(log.add_batch(batch(9)));
        assert!(log.add_batch(batch(10)));
        assert!(log.add_batch(batch(11)));
        assert!(!log.add_batch(batch(12)));

        assert_eq!(log.last_cid(), 11);
        assert_eq!(log.batch(10).map(CommandBatch::consensus_id), Some(10));
        assert!(log.batch(8).is_none());
        assert!(log.batch(12).is_none());

        let state = log.application_state(10, true).ok_or(InternalError::InternalInvariantFailed)?;
        assert_eq!(state.batches().len(), 2);
        assert_eq!(state.last_cid(), 10);
        assert!(state.snapshot().is_some());
        assert!(log.application_state(7, false).is_none());
        assert!(log.application_state(8, false).map_or(false, |s| s.batches.is_none()));
        Ok(())
    }

    #[test]
    fn update_adopts_a_transferred_state() -> Result<()> {
        let mut source = ConfidentialStateLog::new(5, ConfidentialSnapshot::default())?;
        source.new_checkpoint(ConfidentialSnapshot::new(Some(vec![2]), vec![]), 3);
        let _ = source.add_batch(batch(4));
        let _ = source.add_batch(batch(5));
        let state = source.application_state(5, true).ok_or(InternalError::InternalInvariantFailed)?;

        let mut target = ConfidentialStateLog::new(5, ConfidentialSnapshot::default())?;
        target.update(&state);
        assert_eq!(target.last_checkpoint_cid(), 3);
        assert_eq!(target.last_cid(), 5);
        assert_eq!(target.batch(4), source.batch(4));
        assert_eq!(target.snapshot().plain_data(), Some(&[2u8][..]));
        Ok(())
    }

    #[test]
    fn tiny_checkpoint_periods_are_rejected() {
        assert!(ConfidentialStateLog::new(1, ConfidentialSnapshot::default()).is_err());
    }
}

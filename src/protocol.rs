// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Identities of the replicas taking part in the service and the view they
//! agree on.

use crate::errors::{InternalError, Result};
use k256::Scalar;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};

/// The identifier a replica (or client) has in the BFT layer.
pub type ProcessId = u32;

/// The stable identity of a shareholder, derived from its [`ProcessId`].
///
/// The mapping is `process + 1`, so a shareholder is never the point zero,
/// where every polynomial keeps its secret.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct ShareholderId(u64);

impl ShareholderId {
    /// The shareholder owned by `process`.
    pub fn from_process(process: ProcessId) -> Self {
        Self(u64::from(process) + 1)
    }

    /// The process owning this shareholder.
    pub fn process(&self) -> ProcessId {
        // `1 <= self.0 <= u32::MAX + 1`, checked on every way in.
        (self.0 - 1) as ProcessId
    }

    /// The coordinate of this shareholder in the scalar field.
    pub fn as_scalar(&self) -> Scalar {
        Scalar::from(self.0)
    }

    pub(crate) fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl TryFrom<u64> for ShareholderId {
    type Error = InternalError;

    fn try_from(value: u64) -> Result<Self> {
        let process = value
            .checked_sub(1)
            .and_then(|p| ProcessId::try_from(p).ok())
            .ok_or_else(|| {
                InternalError::InvalidArgument(format!("no process owns shareholder {value}"))
            })?;
        Ok(Self::from_process(process))
    }
}

impl From<ShareholderId> for u64 {
    fn from(shareholder: ShareholderId) -> Self {
        shareholder.0
    }
}

impl Debug for ShareholderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Shareholder({})", self.0)
    }
}

impl Display for ShareholderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The set of replicas holding shares, together with the number `f` of
/// Byzantine replicas it tolerates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    processes: Vec<ProcessId>,
    f: usize,
}

impl View {
    /// Build a view over `processes` tolerating `f` faults.
    ///
    /// Requires `f >= 1`, `n >= 3f + 1` and no duplicated process.
    pub fn new(processes: Vec<ProcessId>, f: usize) -> Result<Self> {
        if f == 0 {
            return arg_err!("a view must tolerate at least one fault");
        }
        if processes.len() < 3 * f + 1 {
            return Err(InternalError::InvalidArgument(format!(
                "{} processes cannot tolerate {} faults",
                processes.len(),
                f
            )));
        }
        let mut sorted = processes.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != processes.len() {
            return arg_err!("a view cannot contain the same process twice");
        }
        Ok(Self { processes, f })
    }

    /// Processes of the view, in view order.
    pub fn processes(&self) -> &[ProcessId] {
        &self.processes
    }

    /// Shareholders of the view, in view order.
    pub fn shareholders(&self) -> Vec<ShareholderId> {
        self.processes
            .iter()
            .map(|p| ShareholderId::from_process(*p))
            .collect()
    }

    /// Number of processes.
    pub fn n(&self) -> usize {
        self.processes.len()
    }

    /// Number of tolerated faults.
    pub fn f(&self) -> usize {
        self.f
    }

    /// The number of matching reports needed before anything is trusted.
    pub fn agreement(&self) -> usize {
        self.f + 1
    }

    /// Number of recovery blocks, `ceil(n / f)`.
    pub fn blocks(&self) -> usize {
        (self.n() + self.f - 1) / self.f
    }

    /// The 1-based recovery block holding `shareholder`'s witness share.
    pub fn block_of(&self, shareholder: ShareholderId) -> Result<usize> {
        let position = self
            .processes
            .iter()
            .position(|p| *p == shareholder.process())
            .ok_or_else(|| {
                InternalError::InvalidArgument(format!("{shareholder} is not part of the view"))
            })?;
        Ok(position / self.f + 1)
    }

    /// Whether `process` belongs to the view.
    pub fn contains(&self, process: ProcessId) -> bool {
        self.processes.contains(&process)
    }

    /// Every process of the view except `me`.
    pub fn others(&self, me: ProcessId) -> Vec<ProcessId> {
        self.processes
            .iter()
            .copied()
            .filter(|p| *p != me)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shareholder_mapping_is_bijective() {
        for process in [0u32, 1, 7, u32::MAX - 1] {
            let shareholder = ShareholderId::from_process(process);
            assert_eq!(shareholder.process(), process);
            assert_ne!(shareholder.as_scalar(), Scalar::ZERO);
        }
    }

    #[test]
    fn shareholders_outside_the_process_range_do_not_deserialize() -> Result<()> {
        for value in [0u64, u64::from(u32::MAX) + 2] {
            let decoded: Result<ShareholderId> = deserialize!(&serialize!(&value)?);
            assert!(decoded.is_err());
            assert!(ShareholderId::try_from(value).is_err());
        }
        let last = ShareholderId::from_process(u32::MAX);
        let decoded: ShareholderId = deserialize!(&serialize!(&last)?)?;
        assert_eq!(decoded.process(), u32::MAX);
        assert_eq!(u64::from(decoded), u64::from(u32::MAX) + 1);
        Ok(())
    }

    #[test]
    fn blocks_cover_every_shareholder() -> Result<()> {
        let view = View::new(vec![0, 1, 2, 3], 1)?;
        assert_eq!(view.blocks(), 4);
        for (i, shareholder) in view.shareholders().into_iter().enumerate() {
            assert_eq!(view.block_of(shareholder)?, i + 1);
        }

        let view = View::new((0..7).collect(), 2)?;
        assert_eq!(view.blocks(), 4);
        let blocks: Vec<usize> = view
            .shareholders()
            .into_iter()
            .map(|s| view.block_of(s))
            .collect::<Result<_>>()?;
        assert_eq!(blocks, vec![1, 1, 2, 2, 3, 3, 4]);
        Ok(())
    }

    #[test]
    fn view_rejects_bad_parameters() {
        assert!(View::new(vec![0, 1, 2], 1).is_err());
        assert!(View::new(vec![0, 1, 2, 3], 0).is_err());
        assert!(View::new(vec![0, 1, 2, 2], 1).is_err());
    }
}

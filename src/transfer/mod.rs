// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Blinded state transfer.
//!
//! A recovering replica asks its peers for the state at some consensus id.
//! Every peer separates its state into common state and shares, blinds each
//! share for the recovering replica (see [`crate::vssr`]) and sends the
//! result over a dedicated TCP connection. One peer, the state sender,
//! ships the common state itself; the others only its hash. The recovering
//! replica waits until enough peers agree, recovers its shares and rebuilds
//! the state.
//!
//! Replica `p` listens on port `base + p`.

mod handler;
mod hashing;
mod manager;
mod receiver;
mod reconciliation;
mod sender;
mod wire;

pub use handler::BlindedStateHandler;
pub use manager::{ConfidentialStateManager, StateRequest, StateRequestTransport};
pub use receiver::BlindedDataReceiver;
pub use sender::BlindedStateSender;
pub use wire::BlindedData;

use crate::{
    errors::{InternalError, Result},
    protocol::ProcessId,
};
use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

/// Where replicas can be reached. Unknown replicas are assumed to run on
/// the loopback interface.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerDirectory {
    hosts: BTreeMap<ProcessId, IpAddr>,
}

impl PeerDirectory {
    /// Record the host of `process`.
    pub fn insert(&mut self, process: ProcessId, host: IpAddr) {
        let _ = self.hosts.insert(process, host);
    }

    /// The host of `process`.
    pub fn host_of(&self, process: ProcessId) -> IpAddr {
        self.hosts
            .get(&process)
            .copied()
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    /// The blinded state listener address of `process`.
    pub fn address_of(&self, process: ProcessId, base_port: u16) -> Result<SocketAddr> {
        let port = u16::try_from(process)
            .ok()
            .and_then(|offset| base_port.checked_add(offset))
            .ok_or_else(|| {
                InternalError::Configuration(format!(
                    "port {base_port} + {process} is out of range"
                ))
            })?;
        Ok(SocketAddr::new(self.host_of(process), port))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_follow_the_port_base() -> Result<()> {
        let mut directory = PeerDirectory::default();
        directory.insert(2, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
        let expected = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 11002);
        assert_eq!(directory.address_of(2, 11000)?, expected);
        assert_eq!(directory.address_of(1, 11000)?.port(), 11001);
        assert!(directory.address_of(1, u16::MAX).is_err());
        assert!(directory.address_of(70_000, 0).is_err());
        Ok(())
    }
}

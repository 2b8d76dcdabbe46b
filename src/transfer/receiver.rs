// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use super::{
    wire::{read_payload, BlindedData},
    PeerDirectory,
};
use crate::{
    commitment::CommitmentKind,
    errors::{InternalError, Result},
    protocol::{ProcessId, View},
};
use std::{
    collections::BTreeSet,
    io::BufReader,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, info, warn};

/// Listens for the blinded data of one round and forwards it, parsed, to a
/// [`BlindedStateHandler`](super::BlindedStateHandler).
///
/// Connections are served one at a time. Each peer may deliver once.
#[derive(Debug)]
pub struct BlindedDataReceiver {
    address: SocketAddr,
    cancelled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// What the listener thread needs to judge incoming data.
struct Listener {
    view: View,
    me: ProcessId,
    kind: CommitmentKind,
    round: u64,
    read_timeout: Duration,
    cancelled: Arc<AtomicBool>,
    forward: Sender<BlindedData>,
}

impl Listener {
    fn serve(self, listener: TcpListener) {
        let mut delivered = BTreeSet::new();
        for stream in listener.incoming() {
            if self.cancelled.load(Ordering::SeqCst) {
                break;
            }
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to accept a connection: {}", e);
                    continue;
                }
            };
            let data = match self.read(&stream) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Dropping blinded data from {:?}: {:?}", stream.peer_addr().ok(), e);
                    continue;
                }
            };
            if !self.view.contains(data.from) || data.from == self.me {
                warn!("Dropping blinded data claiming to come from {}", data.from);
                continue;
            }
            if data.round != self.round {
                debug!("Dropping data of round {} from replica {}", data.round, data.from);
                continue;
            }
            if !delivered.insert(data.from) {
                warn!("Replica {} delivered blinded data twice", data.from);
                continue;
            }
            if self.forward.send(data).is_err() {
                debug!("Nobody is waiting for round {} anymore", self.round);
                break;
            }
        }
        info!("Stopped listening for round {}", self.round);
    }

    fn read(&self, stream: &TcpStream) -> Result<BlindedData> {
        stream.set_read_timeout(Some(self.read_timeout))?;
        read_payload(BufReader::new(stream), self.kind)
    }
}

impl BlindedDataReceiver {
    /// Listen on `base_port + me` for the data of `round`.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        view: View,
        me: ProcessId,
        kind: CommitmentKind,
        directory: &PeerDirectory,
        base_port: u16,
        round: u64,
        read_timeout: Duration,
        forward: Sender<BlindedData>,
    ) -> Result<Self> {
        let address = directory.address_of(me, base_port)?;
        let listener = TcpListener::bind(address)?;
        info!("Listening for blinded state of round {} on {}", round, address);
        let cancelled = Arc::new(AtomicBool::new(false));
        let state = Listener {
            view,
            me,
            kind,
            round,
            read_timeout,
            cancelled: cancelled.clone(),
            forward,
        };
        let handle = thread::Builder::new()
            .name(format!("blinded-receiver-{me}"))
            .spawn(move || state.serve(listener))?;
        Ok(Self {
            address,
            cancelled,
            handle: Some(handle),
        })
    }

    /// The address listened on.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Stop listening and wait for the listener thread.
    pub fn stop(&mut self) -> Result<()> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return Ok(()),
        };
        self.cancelled.store(true, Ordering::SeqCst);
        // Unblock the accept call.
        if let Err(e) = TcpStream::connect(self.address) {
            debug!("Wake-up connection failed: {}", e);
        }
        handle
            .join()
            .map_err(|_| InternalError::InternalInvariantFailed)
    }
}

impl Drop for BlindedDataReceiver {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Blinded data receiver did not stop cleanly: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        state::{separation, testing},
        transfer::{sender::payload_for, testing::free_port_base, wire::write_payload},
        vssr::testing::Fixture,
    };
    use rand::rngs::OsRng;
    use std::{io::Write, sync::mpsc};

    #[test]
    fn forwards_each_peer_once_and_drops_impostors() -> Result<()> {
        let fixture = Fixture::new(1, CommitmentKind::Linear)?;
        let states = testing::states(&fixture)?;
        let directory = PeerDirectory::default();
        let base = free_port_base(4)?;
        let (tx, rx) = mpsc::channel();
        let mut receiver = BlindedDataReceiver::start(
            fixture.view.clone(),
            0,
            CommitmentKind::Linear,
            &directory,
            base,
            5,
            Duration::from_secs(5),
            tx,
        )?;

        let send = |from: u32, claimed: u32, round: u64| -> Result<()> {
            let separated = separation::separate(&states[from as usize])?;
            let payload =
                payload_for(&mut OsRng, &fixture.servers[from as usize], &separated, 0, false, round)?;
            let mut stream = TcpStream::connect(receiver.address())?;
            write_payload(&mut stream, claimed, CommitmentKind::Linear, &payload)?;
            Ok(())
        };
        send(1, 1, 5)?;
        send(1, 1, 5)?;
        send(2, 2, 4)?;
        send(3, 0, 5)?;
        send(3, 9, 5)?;
        // Garbage does not stop the listener.
        TcpStream::connect(receiver.address())?.write_all(&[1, 2, 3])?;
        send(3, 3, 5)?;

        let first = rx.recv_timeout(Duration::from_secs(10)).map_err(|_| InternalError::Timeout)?;
        let second = rx.recv_timeout(Duration::from_secs(10)).map_err(|_| InternalError::Timeout)?;
        assert_eq!((first.from(), second.from()), (1, 3));
        assert_eq!(first.items(), 3);

        receiver.stop()?;
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        Ok(())
    }
}

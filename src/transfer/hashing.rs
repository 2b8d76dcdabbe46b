// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::errors::{InternalError, Result};
use sha2::{Digest, Sha256};
use std::{
    sync::mpsc::{self, Sender},
    thread::{self, JoinHandle},
};
use tracing::trace;

/// Hashes data on a helper thread while the caller keeps reading it.
///
/// Chunks are hashed in the order they are fed.
#[derive(Debug)]
pub(crate) struct HashWorker {
    chunks: Sender<Vec<u8>>,
    handle: JoinHandle<[u8; 32]>,
}

impl HashWorker {
    pub(crate) fn start() -> Result<Self> {
        let (chunks, incoming) = mpsc::channel::<Vec<u8>>();
        let handle = thread::Builder::new()
            .name("hash-worker".into())
            .spawn(move || {
                let mut hasher = Sha256::new();
                let mut total = 0usize;
                for chunk in incoming {
                    total += chunk.len();
                    hasher.update(&chunk);
                }
                trace!("Hashed {} bytes", total);
                hasher.finalize().into()
            })?;
        Ok(Self { chunks, handle })
    }

    /// Queue a chunk.
    pub(crate) fn update(&self, chunk: Vec<u8>) -> Result<()> {
        self.chunks
            .send(chunk)
            .map_err(|_| InternalError::InternalInvariantFailed)
    }

    /// Wait for every queued chunk to be hashed and return the digest.
    pub(crate) fn finish(self) -> Result<[u8; 32]> {
        drop(self.chunks);
        self.handle
            .join()
            .map_err(|_| InternalError::InternalInvariantFailed)
    }

    /// Hash `data` on a helper thread, a chunk at a time.
    pub(crate) fn digest(data: &[u8], chunk: usize) -> Result<[u8; 32]> {
        let worker = Self::start()?;
        for piece in data.chunks(chunk.max(1)) {
            worker.update(piece.to_vec())?;
        }
        worker.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::sha256;

    #[test]
    fn chunked_digest_matches_one_shot() -> Result<()> {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(HashWorker::digest(&data, 333)?, sha256(&[&data]));
        assert_eq!(HashWorker::digest(&[], 16)?, sha256(&[]));
        Ok(())
    }
}

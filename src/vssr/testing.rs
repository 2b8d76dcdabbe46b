// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! A complete deployment (one client, `n` servers) for tests.

use super::{ClientScheme, ServerScheme, VssrScheme, VssrShare};
use crate::{
    cipher::KeyStore,
    commitment::CommitmentKind,
    config::VssrConfig,
    dprf::{DprfParameters, DprfSetup},
    errors::Result,
    protocol::{ProcessId, View},
};
use rand::rngs::OsRng;
use std::sync::Arc;

pub(crate) const CLIENT: ProcessId = 1000;

pub(crate) struct Fixture {
    pub(crate) view: View,
    pub(crate) config: VssrConfig,
    pub(crate) client: ClientScheme,
    pub(crate) servers: Vec<ServerScheme>,
}

impl Fixture {
    pub(crate) fn new(f: usize, kind: CommitmentKind) -> Result<Self> {
        let n = 3 * f + 1;
        let processes: Vec<ProcessId> = (0..n as ProcessId).collect();
        let view = View::new(processes.clone(), f)?;
        let config = VssrConfig {
            commitment_scheme: kind,
            share_processing_threads: 2,
            ..VssrConfig::default()
        };
        let dprf = Arc::new(DprfParameters::from_setup(
            &DprfSetup::default(),
            f,
            &view.shareholders(),
        )?);
        let everybody: Vec<ProcessId> = processes.iter().copied().chain([CLIENT]).collect();

        let client = ClientScheme::new(VssrScheme::new(
            view.clone(),
            &config,
            dprf.clone(),
            KeyStore::derived(CLIENT, everybody.clone()),
        )?);
        let servers = processes
            .iter()
            .map(|p| {
                let own = Arc::new(DprfParameters::clone(&dprf).restrict_to(
                    crate::protocol::ShareholderId::from_process(*p),
                ));
                let base = VssrScheme::new(
                    view.clone(),
                    &config,
                    own,
                    KeyStore::derived(*p, everybody.clone()),
                )?;
                ServerScheme::new(base, *p)
            })
            .collect::<Result<_>>()?;
        Ok(Self {
            view,
            config,
            client,
            servers,
        })
    }

    /// Share `secret` and let every server extract its share.
    pub(crate) fn share(&self, secret: &[u8]) -> Result<Vec<VssrShare>> {
        let published = self.client.share(&mut OsRng, secret)?;
        self.servers
            .iter()
            .map(|s| s.extract_share(CLIENT, &published))
            .collect()
    }
}

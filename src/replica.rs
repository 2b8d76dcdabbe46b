// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Glue between an ordering layer and a service holding confidential data.
//!
//! The ordering layer hands every request to a [`ConfidentialReplica`],
//! which extracts this replica's shares, runs the service's
//! [`ConfidentialExecutor`], logs the request and periodically checkpoints
//! the service. The log backs [`ConfidentialReplica::state`], which peers
//! send, blinded, to a recovering replica; that replica installs the result
//! through [`ConfidentialReplica::set_state`].

use crate::{
    config::VssrConfig,
    errors::{InternalError, Result},
    messages::{ConfidentialData, ConfidentialMessage, MessageType, Request},
    state::{
        ApplicationState, Command, CommandBatch, ConfidentialSnapshot, ConfidentialStateLog,
        MessageContext,
    },
    vssr::ServerScheme,
};
use rand::rngs::OsRng;
use std::collections::HashMap;
use tracing::{debug, error, info, instrument, warn};

/// The replicated service.
pub trait ConfidentialExecutor {
    /// Execute an ordered request.
    fn execute_ordered(
        &mut self,
        plain_data: Option<&[u8]>,
        shares: &[ConfidentialData],
        context: &MessageContext,
    ) -> Result<ConfidentialMessage>;

    /// Execute a request that bypassed ordering. It must not change state.
    fn execute_unordered(
        &mut self,
        plain_data: Option<&[u8]>,
        shares: &[ConfidentialData],
        context: &MessageContext,
    ) -> Result<ConfidentialMessage>;

    /// The current state of the service.
    fn snapshot(&self) -> ConfidentialSnapshot;

    /// Replace the state of the service.
    fn install_snapshot(&mut self, snapshot: ConfidentialSnapshot) -> Result<()>;
}

type RequestKey = (u32, i32, i32);

/// A replica of a service with confidential state.
#[derive(Debug)]
pub struct ConfidentialReplica<E> {
    scheme: ServerScheme,
    config: VssrConfig,
    executor: E,
    log: ConfidentialStateLog,
    checkpoint_period: i32,
    pending: Vec<(Command, MessageContext)>,
    verified: HashMap<RequestKey, Request>,
    inbox: Vec<(MessageContext, Option<Vec<u8>>)>,
}

fn key_of(context: &MessageContext) -> RequestKey {
    (context.sender, context.session, context.sequence)
}

impl<E: ConfidentialExecutor> ConfidentialReplica<E> {
    /// A replica checkpointing `executor` every `checkpoint_period`
    /// consensus instances.
    pub fn new(
        scheme: ServerScheme,
        config: VssrConfig,
        executor: E,
        checkpoint_period: usize,
    ) -> Result<Self> {
        config.validate()?;
        let log = ConfidentialStateLog::new(checkpoint_period, executor.snapshot())?;
        let checkpoint_period = i32::try_from(checkpoint_period).map_err(|_| {
            InternalError::Configuration(format!("checkpoint period {checkpoint_period} is too large"))
        })?;
        info!("Logging to memory");
        Ok(Self {
            scheme,
            config,
            executor,
            log,
            checkpoint_period,
            pending: Vec::new(),
            verified: HashMap::new(),
            inbox: Vec::new(),
        })
    }

    /// The service.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// The request log.
    pub fn log(&self) -> &ConfidentialStateLog {
        &self.log
    }

    /// Admission check run before ordering. Requests with shares are
    /// decoded and verified when `verify_client_requests` is set; the
    /// decoded request is kept for execution.
    pub fn is_valid_request(
        &mut self,
        common: &[u8],
        private: Option<&[u8]>,
        context: &MessageContext,
    ) -> bool {
        if private.is_none() || !self.config.verify_client_requests {
            return true;
        }
        let request = match Request::decode(&self.scheme, context.sender, common, private) {
            Ok(request) => request,
            Err(e) => {
                warn!("Failed to decompose request from {}: {:?}", context.sender, e);
                return false;
            }
        };
        if !request
            .shares()
            .iter()
            .all(|data| self.scheme.verify(data.share()))
        {
            warn!("Client {} sent me an invalid share", context.sender);
            return false;
        }
        let _ = self.verified.insert(key_of(context), request);
        true
    }

    fn preprocess(
        &mut self,
        common: &[u8],
        private: Option<&[u8]>,
        context: &MessageContext,
    ) -> Result<Request> {
        if let Some(request) = self.verified.remove(&key_of(context)) {
            return Ok(request);
        }
        Request::decode(&self.scheme, context.sender, common, private).map_err(|e| {
            warn!("Failed to decompose request from {}: {:?}", context.sender, e);
            e
        })
    }

    fn respond(&self, response: ConfidentialMessage, context: &MessageContext) -> Result<Vec<u8>> {
        if self.config.use_tls_encryption {
            response.to_bytes()
        } else {
            response
                .encrypt_for(&mut OsRng, &self.scheme, context.sender)?
                .to_bytes()
        }
    }

    /// Execute an ordered request and log it. Application messages are
    /// queued for [`ConfidentialReplica::take_application_messages`] and
    /// answered with an empty response.
    #[instrument(skip_all, fields(sender = context.sender, cid = context.consensus_id), err(Debug))]
    pub fn execute_ordered(
        &mut self,
        common: &[u8],
        private: Option<&[u8]>,
        context: &MessageContext,
    ) -> Result<Vec<u8>> {
        let request = match self.preprocess(common, private, context) {
            Ok(request) => request,
            Err(e) => {
                self.log_request(Command::Plain(common.to_vec()), context);
                return Err(e);
            }
        };
        let response = match request.message_type() {
            MessageType::Application => {
                debug!(
                    "Received application ordered message of {} in CID {}. Regency: {}",
                    context.sender, context.consensus_id, context.regency
                );
                self.inbox
                    .push((context.clone(), request.plain_data().map(<[u8]>::to_vec)));
                Ok(Vec::new())
            }
            MessageType::Client => self
                .executor
                .execute_ordered(request.plain_data(), request.shares(), context)
                .and_then(|response| self.respond(response, context)),
        };
        self.log_request(Command::Confidential(request), context);
        response
    }

    /// Execute a request that bypassed ordering. Nothing is logged.
    pub fn execute_unordered(
        &mut self,
        common: &[u8],
        private: Option<&[u8]>,
        context: &MessageContext,
    ) -> Result<Vec<u8>> {
        let request = Request::decode(&self.scheme, context.sender, common, private)?;
        match request.message_type() {
            MessageType::Application => {
                debug!(
                    "Received application unordered message of {} in CID {}",
                    context.sender, context.consensus_id
                );
                self.inbox
                    .push((context.clone(), request.plain_data().map(<[u8]>::to_vec)));
                Ok(Vec::new())
            }
            MessageType::Client => {
                let response = self.executor.execute_unordered(
                    request.plain_data(),
                    request.shares(),
                    context,
                )?;
                self.respond(response, context)
            }
        }
    }

    /// Application messages received since the last call.
    pub fn take_application_messages(&mut self) -> Vec<(MessageContext, Option<Vec<u8>>)> {
        std::mem::take(&mut self.inbox)
    }

    fn log_request(&mut self, command: Command, context: &MessageContext) {
        self.pending.push((command, context.clone()));
        if !context.last_in_batch {
            return;
        }
        let cid = context.consensus_id;
        let pending = std::mem::take(&mut self.pending);
        if cid > 0 && cid % self.checkpoint_period == 0 {
            info!("Performing checkpoint for consensus {}", cid);
            self.log.new_checkpoint(self.executor.snapshot(), cid);
            return;
        }
        // One batch per consensus id, in order.
        let mut batches: Vec<CommandBatch> = Vec::new();
        for (command, context) in pending {
            match batches.last_mut() {
                Some(batch) if batch.consensus_id == context.consensus_id => {
                    batch.commands.push(command);
                    batch.contexts.push(context);
                }
                _ => batches.push(CommandBatch::new(
                    context.consensus_id,
                    vec![command],
                    vec![context],
                )),
            }
        }
        for batch in batches {
            let _ = self.log.add_batch(batch);
        }
    }

    /// The state up to `consensus_id`, for a recovering peer. Empty if the
    /// log does not cover it.
    pub fn state(&self, consensus_id: i32, with_snapshot: bool) -> ApplicationState {
        debug!("Getting state until CID {}", consensus_id);
        if consensus_id < 0 {
            return ApplicationState::empty();
        }
        self.log
            .application_state(consensus_id, with_snapshot)
            .unwrap_or_else(ApplicationState::empty)
    }

    /// Install a transferred state: adopt its log, install its snapshot and
    /// replay the logged client requests. Returns the last consensus id now
    /// covered.
    #[instrument(skip_all, err(Debug))]
    pub fn set_state(&mut self, state: &ApplicationState) -> Result<i32> {
        info!(
            "I'm going to update myself from CID {} to CID {}",
            state.last_checkpoint_cid(),
            state.last_cid()
        );
        self.log.update(state);
        let last_checkpoint_cid = self.log.last_checkpoint_cid();
        let last_cid = self.log.last_cid();
        if let Some(snapshot) = state.snapshot() {
            info!("Installing snapshot up to CID {}", last_checkpoint_cid);
            self.executor.install_snapshot(snapshot.clone())?;
        }
        for cid in last_checkpoint_cid.saturating_add(1)..=last_cid {
            let batch = match self.log.batch(cid) {
                Some(batch) => batch,
                None => {
                    warn!("Consensus {} is missing from the log", cid);
                    continue;
                }
            };
            if batch.is_no_op() {
                continue;
            }
            for (command, context) in batch.commands.iter().zip(&batch.contexts) {
                match command {
                    Command::Plain(_) => {
                        warn!("Skipping undecodable request of consensus {}", cid)
                    }
                    Command::Confidential(request)
                        if request.message_type() == MessageType::Application =>
                    {
                        debug!("Ignoring application request");
                    }
                    Command::Confidential(request) => {
                        if let Err(e) = self.executor.execute_ordered(
                            request.plain_data(),
                            request.shares(),
                            context,
                        ) {
                            error!("Failed to replay a request of consensus {}: {:?}", cid, e);
                        }
                    }
                }
            }
        }
        Ok(last_cid)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::BTreeMap;

    /// Stores secrets under names: `put <name>` with one secret, `get
    /// <name>` returning it.
    #[derive(Debug, Default)]
    pub(crate) struct SecretMap {
        pub(crate) entries: BTreeMap<Vec<u8>, ConfidentialData>,
    }

    impl SecretMap {
        fn run(
            &mut self,
            plain_data: Option<&[u8]>,
            shares: &[ConfidentialData],
            write: bool,
        ) -> Result<ConfidentialMessage> {
            let command = plain_data.unwrap_or_default();
            if let (true, Some(name)) = (write, command.strip_prefix(b"put ")) {
                let data = shares
                    .first()
                    .cloned()
                    .ok_or(InternalError::InternalInvariantFailed)?;
                let _ = self.entries.insert(name.to_vec(), data);
                return ConfidentialMessage::new(Some(b"ok".to_vec()), &[]);
            }
            match command.strip_prefix(b"get ").and_then(|name| self.entries.get(name)) {
                Some(data) => ConfidentialMessage::new(None, std::slice::from_ref(data)),
                None => ConfidentialMessage::new(Some(b"missing".to_vec()), &[]),
            }
        }
    }

    impl ConfidentialExecutor for SecretMap {
        fn execute_ordered(
            &mut self,
            plain_data: Option<&[u8]>,
            shares: &[ConfidentialData],
            _: &MessageContext,
        ) -> Result<ConfidentialMessage> {
            self.run(plain_data, shares, true)
        }

        fn execute_unordered(
            &mut self,
            plain_data: Option<&[u8]>,
            shares: &[ConfidentialData],
            _: &MessageContext,
        ) -> Result<ConfidentialMessage> {
            self.run(plain_data, shares, false)
        }

        fn snapshot(&self) -> ConfidentialSnapshot {
            let names = self.entries.keys().flat_map(|k| {
                let mut entry = (k.len() as u32).to_be_bytes().to_vec();
                entry.extend_from_slice(k);
                entry
            });
            ConfidentialSnapshot::new(
                Some(names.collect()),
                self.entries.values().cloned().collect(),
            )
        }

        fn install_snapshot(&mut self, snapshot: ConfidentialSnapshot) -> Result<()> {
            let mut names = snapshot.plain_data().unwrap_or_default();
            let mut entries = BTreeMap::new();
            for data in snapshot.shares() {
                let len: [u8; 4] = names
                    .get(..4)
                    .and_then(|len| len.try_into().ok())
                    .ok_or(InternalError::Serialization)?;
                let end = 4 + u32::from_be_bytes(len) as usize;
                let name = names.get(4..end).ok_or(InternalError::Serialization)?;
                let _ = entries.insert(name.to_vec(), data.clone());
                names = &names[end..];
            }
            self.entries = entries;
            Ok(())
        }
    }
}

//! Example usage of the [`vssr`] crate.
//!
//! Every replica stores client secrets as shares. After a number of
//! requests were ordered, replica 0 loses its state and fetches it from
//! its peers over loopback TCP. Each peer is a worker thread answering
//! state requests that reach it through a [`std::sync::mpsc`] channel.

use anyhow::{self, Context};
use clap::Parser;
use rand::{rngs::OsRng, Rng};
use std::{
    collections::BTreeMap,
    sync::{
        mpsc::{channel, Receiver, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Instant,
};
use tracing::{info, instrument, span, Level};
use tracing_subscriber::{self, EnvFilter};
use vssr::{
    cipher::KeyStore,
    commitment::CommitmentKind,
    dprf::{DprfParameters, DprfSetup},
    extractor::ResponseExtractor,
    messages::{ClientRequest, ConfidentialData, ConfidentialMessage, EncryptedConfidentialMessage},
    replica::{ConfidentialExecutor, ConfidentialReplica},
    state::{ConfidentialSnapshot, MessageContext},
    transfer::{ConfidentialStateManager, PeerDirectory, StateRequest},
    ClientScheme, ProcessId, ServerScheme, ShareholderId, View, VssrConfig, VssrScheme,
};

const CLIENT: ProcessId = 1000;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CommandLineArgs {
    /// Number of tolerated faults; `3f + 1` replicas are started.
    #[arg(short, long, default_value_t = 1)]
    faults: usize,
    /// Number of secrets the client stores before the crash.
    #[arg(short, long, default_value_t = 10)]
    secrets: usize,
    /// Commitment scheme: `linear` or `constant`.
    #[arg(short, long, default_value = "linear")]
    commitment: CommitmentKind,
    /// First port of the blinded state listeners.
    #[arg(short, long, default_value_t = 11000)]
    port: u16,
    /// Consensus instances between checkpoints.
    #[arg(long, default_value_t = 4)]
    checkpoint_period: usize,
}

/// Named secrets. `put <name>` stores the request's secret, `get <name>`
/// returns it.
#[derive(Debug, Default)]
struct Vault {
    entries: BTreeMap<String, ConfidentialData>,
}

impl Vault {
    fn run(
        &mut self,
        plain_data: Option<&[u8]>,
        shares: &[ConfidentialData],
        write: bool,
    ) -> vssr::Result<ConfidentialMessage> {
        let command = String::from_utf8_lossy(plain_data.unwrap_or_default()).into_owned();
        match command.split_once(' ') {
            Some(("put", name)) if write => {
                if let Some(data) = shares.first() {
                    self.entries.insert(name.to_owned(), data.clone());
                }
                ConfidentialMessage::new(Some(b"stored".to_vec()), &[])
            }
            Some(("get", name)) => match self.entries.get(name) {
                Some(data) => ConfidentialMessage::new(None, std::slice::from_ref(data)),
                None => ConfidentialMessage::new(Some(b"unknown".to_vec()), &[]),
            },
            _ => ConfidentialMessage::new(Some(b"bad command".to_vec()), &[]),
        }
    }
}

impl ConfidentialExecutor for Vault {
    fn execute_ordered(
        &mut self,
        plain_data: Option<&[u8]>,
        shares: &[ConfidentialData],
        _: &MessageContext,
    ) -> vssr::Result<ConfidentialMessage> {
        self.run(plain_data, shares, true)
    }

    fn execute_unordered(
        &mut self,
        plain_data: Option<&[u8]>,
        shares: &[ConfidentialData],
        _: &MessageContext,
    ) -> vssr::Result<ConfidentialMessage> {
        self.run(plain_data, shares, false)
    }

    fn snapshot(&self) -> ConfidentialSnapshot {
        let names: Vec<&String> = self.entries.keys().collect();
        ConfidentialSnapshot::new(
            serde_json::to_vec(&names).ok(),
            self.entries.values().cloned().collect(),
        )
    }

    fn install_snapshot(&mut self, snapshot: ConfidentialSnapshot) -> vssr::Result<()> {
        let names: Vec<String> = serde_json::from_slice(snapshot.plain_data().unwrap_or(b"[]"))
            .map_err(|_| vssr::InternalError::Serialization)?;
        self.entries = names.into_iter().zip(snapshot.shares().iter().cloned()).collect();
        Ok(())
    }
}

type Replica = ConfidentialReplica<Vault>;
type NoTransport = fn(ProcessId, &StateRequest) -> vssr::Result<()>;

/// The client and server schemes of a `3f + 1` deployment.
fn deployment(f: usize, config: &VssrConfig) -> anyhow::Result<(ClientScheme, Vec<ServerScheme>)> {
    let processes: Vec<ProcessId> = (0..(3 * f + 1) as ProcessId).collect();
    let view = View::new(processes.clone(), f)?;
    let dprf = DprfParameters::from_setup(&DprfSetup::default(), f, &view.shareholders())?;
    let everybody: Vec<ProcessId> = processes.iter().copied().chain([CLIENT]).collect();

    let client = ClientScheme::new(VssrScheme::new(
        view.clone(),
        config,
        Arc::new(dprf.clone()),
        KeyStore::derived(CLIENT, everybody.clone()),
    )?);
    let mut servers = Vec::with_capacity(processes.len());
    for p in &processes {
        let own = dprf.clone().restrict_to(ShareholderId::from_process(*p));
        let base = VssrScheme::new(
            view.clone(),
            config,
            Arc::new(own),
            KeyStore::derived(*p, everybody.clone()),
        )?;
        servers.push(ServerScheme::new(base, *p)?);
    }
    Ok((client, servers))
}

fn context(consensus_id: i32) -> MessageContext {
    MessageContext {
        sender: CLIENT,
        sequence: consensus_id,
        consensus_id,
        last_in_batch: true,
        ..MessageContext::default()
    }
}

/// A peer answering state requests until its channel closes. Hands its
/// replica back when done.
#[instrument(skip_all)]
fn peer_worker(
    replica: Replica,
    manager: ConfidentialStateManager<NoTransport>,
    requests: Receiver<StateRequest>,
) -> Replica {
    for request in requests {
        let state = replica.state(request.consensus_id, true);
        if let Err(e) = manager.on_state_request(&request, &state) {
            tracing::error!("Could not answer {:?}: {:?}", request, e);
        }
    }
    replica
}

/// 1) Set up logging.
/// 2) Order `put` requests on every replica.
/// 3) Move the peers into worker threads and let replica 0 recover its
/// state from them.
/// 4) Read every secret back from the recovered replica and one peer.
fn main() -> anyhow::Result<()> {
    let cli = CommandLineArgs::parse();
    let filter = EnvFilter::from_default_env().add_directive("threaded_recovery=info".parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .compact()
        .init();
    let span = span!(Level::INFO, "main");
    let _enter = span.entered();

    let config = VssrConfig {
        commitment_scheme: cli.commitment,
        recovery_port: cli.port,
        ..VssrConfig::default()
    };
    let (client, servers) = deployment(cli.faults, &config)?;
    let mut replicas = servers
        .iter()
        .map(|s| Replica::new(s.clone(), config.clone(), Vault::default(), cli.checkpoint_period))
        .collect::<vssr::Result<Vec<_>>>()?;

    let mut secrets = BTreeMap::new();
    for cid in 1..=cli.secrets {
        let name = format!("secret-{cid}");
        let mut secret = vec![0u8; 64];
        OsRng.fill(secret.as_mut_slice());
        let command = format!("put {name}");
        let request =
            ClientRequest::new(&mut OsRng, &client, Some(command.as_bytes()), &[secret.as_slice()])?;
        let cid = i32::try_from(cid)?;
        for (replica, process) in replicas.iter_mut().zip(0u32..) {
            replica.execute_ordered(request.common(), request.private_for(process), &context(cid))?;
        }
        secrets.insert(name, secret);
    }
    let last_cid = i32::try_from(cli.secrets)?;
    info!("Ordered {} requests on {} replicas", cli.secrets, replicas.len());

    // Replica 0 crashes; its peers start serving state requests.
    let mut peers = replicas.split_off(1);
    drop(replicas);
    let mut channels: BTreeMap<ProcessId, Sender<StateRequest>> = BTreeMap::new();
    let mut workers: Vec<JoinHandle<Replica>> = Vec::new();
    for (replica, server) in peers.drain(..).zip(&servers[1..]) {
        let (tx, rx) = channel();
        let noop: NoTransport = |_, _| Ok(());
        let manager =
            ConfidentialStateManager::new(server.clone(), config.clone(), PeerDirectory::default(), noop);
        channels.insert(server.me().process(), tx);
        workers.push(thread::spawn(move || peer_worker(replica, manager, rx)));
    }

    let transport = |to: ProcessId, request: &StateRequest| -> vssr::Result<()> {
        channels
            .get(&to)
            .ok_or_else(|| vssr::InternalError::Transport(format!("unknown replica {to}")))?
            .send(request.clone())
            .map_err(|_| vssr::InternalError::Transport(format!("replica {to} is gone")))
    };
    let mut manager = ConfidentialStateManager::new(
        servers[0].clone(),
        config.clone(),
        PeerDirectory::default(),
        transport,
    );
    let started = Instant::now();
    let state = manager.recover_state(last_cid)?;
    info!("Fetched the state in {:?}", started.elapsed());
    drop(manager);
    drop(channels);

    let mut recovered = Replica::new(
        servers[0].clone(),
        config.clone(),
        Vault::default(),
        cli.checkpoint_period,
    )?;
    let covered = recovered.set_state(&state)?;
    info!("Replica 0 is back at consensus {}", covered);

    let mut peers = workers
        .into_iter()
        .map(|w| w.join().map_err(|_| anyhow::anyhow!("a peer worker panicked")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    // Read each secret back from f + 1 replicas, the recovered one included.
    let extractor = ResponseExtractor::new(&client, cli.faults + 1);
    for (cid, (name, secret)) in (last_cid + 1..).zip(&secrets) {
        let command = format!("get {name}");
        let request = ClientRequest::new(&mut OsRng, &client, Some(command.as_bytes()), &[])?;
        let mut responses = Vec::with_capacity(cli.faults + 1);
        let answering = std::iter::once((0, &mut recovered))
            .chain((1u32..).zip(peers.iter_mut()))
            .take(cli.faults + 1);
        for (process, replica) in answering {
            let bytes =
                replica.execute_unordered(request.common(), request.private_for(process), &context(cid))?;
            responses.push((process, EncryptedConfidentialMessage::from_bytes(&bytes)?));
        }
        let extracted = extractor.extract_encrypted(&responses)?;
        let opened = extracted
            .secrets
            .first()
            .with_context(|| format!("no secret returned for {name}"))?;
        anyhow::ensure!(opened == secret, "{name} did not survive the recovery");
    }
    info!("All {} secrets open with the recovered replica", secrets.len());
    Ok(())
}

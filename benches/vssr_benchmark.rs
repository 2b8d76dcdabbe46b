use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use rand::{rngs::OsRng, Rng};
use std::sync::Arc;
use vssr::{
    cipher::KeyStore,
    commitment::CommitmentKind,
    dprf::{DprfParameters, DprfSetup},
    errors::Result,
    vssr::{OpenPublishedShares, VssrShare},
    ClientScheme, ProcessId, ServerScheme, ShareholderId, View, VssrConfig, VssrScheme,
};

const CLIENT: ProcessId = 1000;

/// A client and `3f + 1` servers sharing symmetric keys.
fn deployment(f: usize, kind: CommitmentKind) -> Result<(ClientScheme, Vec<ServerScheme>)> {
    let processes: Vec<ProcessId> = (0..(3 * f + 1) as ProcessId).collect();
    let view = View::new(processes.clone(), f)?;
    let config = VssrConfig {
        commitment_scheme: kind,
        ..VssrConfig::default()
    };
    let dprf = DprfParameters::from_setup(&DprfSetup::default(), f, &view.shareholders())?;
    let everybody: Vec<ProcessId> = processes.iter().copied().chain([CLIENT]).collect();

    let client = ClientScheme::new(VssrScheme::new(
        view.clone(),
        &config,
        Arc::new(dprf.clone()),
        KeyStore::derived(CLIENT, everybody.clone()),
    )?);
    let servers = processes
        .iter()
        .map(|p| {
            let own = dprf.clone().restrict_to(ShareholderId::from_process(*p));
            let base = VssrScheme::new(
                view.clone(),
                &config,
                Arc::new(own),
                KeyStore::derived(*p, everybody.clone()),
            )?;
            ServerScheme::new(base, *p)
        })
        .collect::<Result<_>>()?;
    Ok((client, servers))
}

fn shares_of(client: &ClientScheme, servers: &[ServerScheme], secret: &[u8]) -> Vec<VssrShare> {
    let published = client.share(&mut OsRng, secret).unwrap();
    servers
        .iter()
        .map(|s| s.extract_share(CLIENT, &published).unwrap())
        .collect()
}

fn run_benchmarks_for_given_size(c: &mut Criterion, f: usize, kind: CommitmentKind) {
    let (client, servers) = deployment(f, kind).unwrap();
    let mut secret = vec![0u8; 1024];
    OsRng.fill(secret.as_mut_slice());
    let n = 3 * f + 1;

    c.bench_function(&format!("Share 1 KiB among {n} nodes ({kind:?})"), |b| {
        b.iter(|| client.share(&mut OsRng, &secret).unwrap())
    });

    let shares = shares_of(&client, &servers, &secret);
    c.bench_function(&format!("Verify a share with {n} nodes ({kind:?})"), |b| {
        b.iter(|| assert!(servers[1].verify(&shares[1])))
    });

    let target = servers[0].me();
    c.bench_function(&format!("Recover a share with {n} nodes ({kind:?})"), |b| {
        b.iter_batched(
            || {
                servers[1..]
                    .iter()
                    .zip(&shares[1..])
                    .map(|(s, share)| s.recovery_contribution(&mut OsRng, share, target).unwrap())
                    .collect::<Vec<_>>()
            },
            |contributions| servers[0].recover_share(&contributions).unwrap(),
            BatchSize::SmallInput,
        )
    });

    let mains: Vec<_> = shares[..=f]
        .iter()
        .map(|s| s.main().unwrap().clone())
        .collect();
    let open = OpenPublishedShares::from_main_shares(&mains).unwrap();
    c.bench_function(&format!("Combine {} shares ({kind:?})", f + 1), |b| {
        b.iter(|| client.combine(&open).unwrap())
    });
}

fn criterion_benchmark(c: &mut Criterion) {
    for kind in [CommitmentKind::Linear, CommitmentKind::Constant] {
        run_benchmarks_for_given_size(c, 1, kind);
        run_benchmarks_for_given_size(c, 2, kind);
        run_benchmarks_for_given_size(c, 3, kind);
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regionsim::cluster::Cluster;
use regionsim::env::{AdvancerEnv, TestEnv};
use regionsim::key_range::KeyRange;
use regionsim::probe;
use regionsim::region::Region;
use regionsim::settings::SimConfig;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Parser, Debug)]
#[clap(version, about)]
/// Drive the simulated cluster through rounds of churn and check the
/// computed global checkpoint against ground truth.
struct Args {
    /// path to a TOML config file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
    /// Number of polling rounds
    #[arg(long, default_value = "50")]
    rounds: u64,
    /// Seed override for the cluster and the driver
    #[arg(long)]
    seed: Option<u64>,
    /// Probability that a round splits and scatters regions
    #[arg(long, default_value = "0.3")]
    split_probability: f64,
    /// Probability that a round leaves one region unflushed
    #[arg(long, default_value = "0.2")]
    lag_probability: f64,
    /// Print a JSON summary instead of the cluster dump
    #[arg(long)]
    json: bool,
}

fn random_key(rng: &mut impl Rng) -> Vec<u8> {
    let len = rng.random_range(1..=3);
    (0..len).map(|_| rng.random_range(b'a'..=b'z')).collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.split_probability) && (0.0..=1.0).contains(&args.lag_probability),
        "probabilities must be within [0, 1]"
    );
    let mut cfg = SimConfig::load(args.config.as_deref())?;
    if let Some(seed) = args.seed {
        cfg.seed = Some(seed);
    }
    regionsim::trace::init(cfg.logging.format)?;

    let seed = cfg.seed.unwrap_or_else(rand::random);
    cfg.seed = Some(seed);
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    let cluster = Arc::new(Cluster::new(&cfg)?);
    let env = TestEnv::new(cluster.clone());

    let (tx, mut rx) = mpsc::channel(1);
    env.begin_task(tx).await?;
    let task = rx
        .recv()
        .await
        .ok_or_else(|| anyhow::anyhow!("no task event"))?;
    let ranges = if task.ranges.is_empty() {
        vec![KeyRange::full()]
    } else {
        task.ranges.clone()
    };
    info!(seed, task = %task.name, "simulation started");

    let mut incomplete = 0u64;
    for round in 0..args.rounds {
        cluster.advance_checkpoints();
        if rng.random_bool(args.split_probability) {
            let keys: Vec<Vec<u8>> = (0..rng.random_range(1..=3)).map(|_| random_key(&mut rng)).collect();
            cluster.split_and_scatter(&keys);
        }
        let lagging = rng.random_bool(args.lag_probability);
        if lagging {
            cluster.flush_all_except([random_key(&mut rng)]);
        } else {
            cluster.flush_all();
        }

        // Ground truth over the regions the task covers.
        let covered: Vec<Region> = cluster
            .regions()
            .into_iter()
            .filter(|r| ranges.iter().any(|range| range.overlaps(&r.range)))
            .collect();
        let expected = covered.iter().map(|r| r.checkpoint).min().unwrap_or_default();
        let expect_partial =
            cfg.flush_simulation && covered.iter().any(|r| r.flush.flushed_epoch() != Some(r.epoch));
        match probe::advance_once(&env, &task.name, &ranges).await? {
            Some(checkpoint) => {
                anyhow::ensure!(
                    !expect_partial,
                    "round {round}: persisted {checkpoint} from a partially flushed cluster"
                );
                anyhow::ensure!(
                    checkpoint == expected,
                    "round {round}: persisted {checkpoint}, expected {expected}"
                );
            }
            None => {
                anyhow::ensure!(expect_partial, "round {round}: fully flushed cluster did not converge");
                incomplete += 1;
            }
        }
        cluster.validate()?;
    }

    if args.json {
        let summary = serde_json::json!({
            "seed": seed,
            "rounds": args.rounds,
            "incomplete_rounds": incomplete,
            "regions": cluster.regions().len(),
            "global_checkpoint": env.checkpoint(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", cluster.dump());
        println!("global_checkpoint={} incomplete_rounds={}", env.checkpoint(), incomplete);
    }
    Ok(())
}

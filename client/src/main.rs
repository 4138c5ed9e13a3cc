use std::sync::Arc;

use cfg_if::cfg_if;
use clap::{Parser, Subcommand};
use pool_client::{
    config::{load_config_file, ClientConfig, MiningConfig},
    recorder::{JsonLinesRecorder, LogRecorder, ResultRecorder},
    restful::PoolApi,
    stream::WsTransport,
    thread::DrillxSearcher,
    MiningManager,
};
use pool_shared::{
    identity::Identity,
    log::init_log,
    types::MinerKey,
    utils::{amount_f64_to_u64, amount_u64_to_f64},
};
use reqwest::Url;
use solana_sdk::signature::{read_keypair_file, Keypair};
use tokio::signal;
use tracing::*;

cfg_if! {
    if #[cfg(feature = "build-version")] {
        include!(concat!(env!("OUT_DIR"), "/version.rs"));
    } else {
        pub const VERSION: &str = "unknown";
    }
}

#[derive(Parser, Debug)]
#[command(about, version)]
struct Args {
    #[arg(long, value_name = "POOL_URL", help = "Pool base url, e.g. https://pool.example.com", global = true)]
    url: Option<String>,

    #[arg(long, value_name = "KEYPAIR_PATH", help = "Solana keypair file of the miner", global = true)]
    keypair: Option<String>,

    #[arg(long, value_name = "CONFIG_FILE", help = "Optional JSON config file", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Connect to the pool and mine (default)")]
    Mine {
        #[arg(long, value_name = "CORES_COUNT", help = "The number of CPU cores to allocate to mining")]
        cores: Option<usize>,

        #[arg(long, value_name = "FILE", help = "Append pool results to this file as JSON lines")]
        record: Option<String>,
    },
    #[command(about = "Show the miner's pool balance")]
    Balance,
    #[command(about = "Show the miner's unclaimed rewards")]
    Rewards,
    #[command(about = "Show pool wide information")]
    Stats,
    #[command(about = "Register the miner with the pool")]
    Signup,
    #[command(about = "Claim rewards from the pool")]
    Claim {
        #[arg(long, value_name = "SOLANA_PUBKEY", help = "Wallet receiving the rewards, defaults to the miner")]
        receiver: Option<String>,

        #[arg(long, value_name = "ORE", help = "Amount of ORE to claim")]
        amount: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_log();

    info!("VERSION: {}", VERSION);

    let args = Args::parse();

    let file_config = match args.config.as_deref() {
        Some(path) => load_config_file(path)?,
        None => ClientConfig::default(),
    };

    let url = args
        .url
        .or(file_config.url.clone())
        .ok_or_else(|| anyhow::anyhow!("pool url is required (--url or config file)"))?;
    let api = PoolApi::new(Url::parse(&url)?);

    let keypair_path = args
        .keypair
        .or(file_config.keypair.clone())
        .ok_or_else(|| anyhow::anyhow!("keypair is required (--keypair or config file)"))?;
    let keypair = read_keypair_file(&keypair_path)
        .map_err(|err| anyhow::anyhow!("fail to read keypair {keypair_path}: {err}"))?;
    let miner = miner_key(&keypair)?;

    let command = args.command.unwrap_or(Command::Mine { cores: None, record: None });

    match command {
        Command::Mine { cores, record } => {
            let cores = cores.or(file_config.cores);
            let record = record.or(file_config.record);
            mine(api, keypair, cores, record).await?;
        }
        Command::Balance => {
            info!("balance: {} ORE", api.balance(&miner).await?);
        }
        Command::Rewards => {
            info!("unclaimed rewards: {} ORE", api.rewards(&miner).await?);
        }
        Command::Stats => {
            info!("active miners: {}", api.active_miners().await?);
            info!("pool authority: {}", api.pool_authority_pubkey().await?);
            info!("latest blockhash: {}", api.latest_blockhash().await?);
        }
        Command::Signup => {
            info!("signup: {}", api.signup(&miner).await?);
        }
        Command::Claim { receiver, amount } => {
            let receiver = receiver.map(MinerKey).unwrap_or_else(|| miner.clone());
            let amount = amount_f64_to_u64(amount);
            info!("claim {} ORE to {receiver}", amount_u64_to_f64(amount));
            info!("claim: {}", api.claim(&keypair, &receiver, amount).await?);
        }
    }

    Ok(())
}

fn miner_key(keypair: &Keypair) -> anyhow::Result<MinerKey> {
    let pubkey = Identity::pubkey(keypair).ok_or_else(|| anyhow::anyhow!("keypair has no pubkey"))?;
    Ok(MinerKey::from_bytes(&pubkey))
}

async fn mine(
    api: PoolApi,
    keypair: Keypair,
    cores: Option<usize>,
    record: Option<String>,
) -> anyhow::Result<()> {
    let max_cores = num_cpus::get();
    let cores = cores.unwrap_or(max_cores);

    info!("Client Starting... Threads: {}, Pubkey: {}", cores, miner_key(&keypair)?);

    let recorder: Arc<dyn ResultRecorder> = match record {
        Some(path) => Arc::new(JsonLinesRecorder::open(&path)?),
        None => Arc::new(LogRecorder),
    };

    let searcher = DrillxSearcher::start(max_cores);
    debug!("search threads: {}", searcher.cores());

    let manager = MiningManager::new(
        Arc::new(WsTransport::new(api)?),
        Arc::new(keypair),
        Arc::new(searcher),
        recorder,
        Arc::new(MiningConfig::new(cores, max_cores)),
    );

    manager.start();

    let mut metrics = manager.subscribe_metrics();
    let mut last_rate = 0.0;
    loop {
        tokio::select! {
            res = signal::ctrl_c() => {
                if let Err(err) = res {
                    error!("failed to listen for Ctrl+C: {err}");
                }
                info!("ctrl+c received. start shutdown");
                break;
            }
            changed = metrics.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = metrics.borrow_and_update().clone();
                if current.hash_rate != last_rate {
                    last_rate = current.hash_rate;
                    info!(
                        "mining power: {:.2} H/s, round difficulty: {}, last submitted: {}",
                        current.hash_rate, current.current_difficulty, current.last_reported_difficulty
                    );
                }
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

//! keydex - Key Transparency Directory Server
//!
//! Run modes:
//!   keydex init [--dir <path>]                        - Generate keys and a config file
//!   keydex run [--config <path>] [--pid-file <path>]  - Start the directory server
//!
//! The running server cuts a new epoch every `epoch_deadline_secs`, reloads
//! policies from the config file on SIGUSR2, and exits on SIGINT after
//! draining in-flight requests.

use std::env;
use std::path::PathBuf;

use tracing::info;

use keydex::api::{self, AppState};
use keydex::config::KeydexConfig;
use keydex::directory::Directory;
use keydex::logging;
use keydex::storage::{EpochStore, SqliteEpochStore};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    match args[1].as_str() {
        "init" => run_init(&args[2..]),
        "run" => run_server(&args[2..]).await,
        "help" | "--help" | "-h" => print_usage(),
        _ => print_usage(),
    }
}

fn print_usage() {
    println!("keydex - Key Transparency Directory Server");
    println!();
    println!("Usage:");
    println!("  keydex init [--dir <path>]                        Generate keys and keydex.toml");
    println!("  keydex run [--config <path>] [--pid-file <path>]  Start the directory server");
    println!();
    println!("Environment Variables:");
    println!("  KEYDEX_CONFIG   Config file path when --config is not given");
    println!();
    println!("Signals:");
    println!("  SIGUSR2   Reload policies (epoch deadline, VRF key) from the config file");
    println!("  SIGINT    Graceful shutdown");
}

/// Scan for `--name <value>` in the argument list.
fn flag_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

/// Generate keys and write a fresh config file.
fn run_init(args: &[String]) {
    let dir = flag_value(args, "--dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    match KeydexConfig::generate(&dir) {
        Ok((config, path)) => {
            let (signing, vrf) = match (config.signing_keypair(), config.vrf_secret()) {
                (Ok(signing), Ok(vrf)) => (signing, vrf),
                _ => {
                    eprintln!("init failed: generated keys did not round-trip");
                    std::process::exit(1);
                }
            };
            println!("Wrote {}", path.display());
            println!("Signing public key: {}", hex::encode(signing.public().to_bytes()));
            println!("VRF public key:     {}", hex::encode(vrf.public().to_bytes()));
            println!();
            println!("Keep the config file private: it contains the secret keys.");
        }
        Err(e) => {
            eprintln!("init failed: {e}");
            std::process::exit(1);
        }
    }
}

/// Start the directory server.
async fn run_server(args: &[String]) {
    let config_path = flag_value(args, "--config")
        .map(PathBuf::from)
        .unwrap_or_else(KeydexConfig::default_path);

    let config = match KeydexConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("cannot load config {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init_from_config(&config) {
        eprintln!("cannot initialize logging: {e}");
        std::process::exit(1);
    }

    let store: Option<Box<dyn EpochStore>> = match config.db_path.as_deref() {
        Some(db_path) => match SqliteEpochStore::new(db_path) {
            Ok(store) => Some(Box::new(store)),
            Err(e) => {
                eprintln!("cannot open epoch store {db_path}: {e}");
                std::process::exit(1);
            }
        },
        None => None,
    };

    let directory = match build_directory(&config, store.as_deref()) {
        Ok(directory) => directory,
        Err(e) => {
            eprintln!("cannot start directory: {e}");
            std::process::exit(1);
        }
    };

    let pid_file = flag_value(args, "--pid-file");
    if let Some(path) = pid_file.as_deref() {
        if let Err(e) = std::fs::write(path, std::process::id().to_string()) {
            eprintln!("cannot write pid file {path}: {e}");
            std::process::exit(1);
        }
    }

    let state = AppState::new(directory, store, config.epoch_deadline_secs);
    api::spawn_epoch_timer(state.clone());
    spawn_policy_reload(state.clone(), config_path.clone());

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!(target: "keydex::system", "SIGINT received, draining requests");
    };

    if let Err(e) = api::start_server(state, &config.listen_addr, shutdown).await {
        eprintln!("server error: {e}");
    }

    if let Some(path) = pid_file.as_deref() {
        let _ = std::fs::remove_file(path);
    }
}

/// Build the directory, resuming from the persisted epoch when one exists.
fn build_directory(
    config: &KeydexConfig,
    store: Option<&dyn EpochStore>,
) -> keydex::Result<Directory> {
    let policies = config.policies()?;
    let signer = config.signing_keypair()?;
    let hasher = config.hasher()?;

    if let Some(store) = store {
        if let Some(record) = store.load_latest()? {
            info!(
                target: "keydex::system",
                epoch = record.epoch,
                leaves = record.leaves.len(),
                "resuming from persisted epoch"
            );
            let directory =
                Directory::restore(policies, signer, config.history_capacity, hasher, record)?;
            return Ok(directory);
        }
    }

    info!(target: "keydex::system", "starting fresh directory at epoch 0");
    Ok(Directory::new(
        policies,
        signer,
        config.history_capacity,
        hasher,
    )?)
}

/// Reload policies from the config file on SIGUSR2. The new epoch deadline
/// takes effect for the following timer tick; a changed VRF key triggers a
/// reshuffle at the next epoch cut.
fn spawn_policy_reload(state: api::SharedAppState, config_path: PathBuf) {
    #[cfg(unix)]
    tokio::spawn(async move {
        use std::sync::atomic::Ordering;
        use tokio::signal::unix::{signal, SignalKind};

        let mut stream = match signal(SignalKind::user_defined2()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(target: "keydex::system", error = %e, "cannot install SIGUSR2 handler");
                return;
            }
        };

        while stream.recv().await.is_some() {
            match KeydexConfig::load(&config_path) {
                Ok(config) => match config.policies() {
                    Ok(policies) => {
                        state
                            .epoch_deadline_secs
                            .store(config.epoch_deadline_secs, Ordering::Relaxed);
                        let mut directory = state.directory.write().await;
                        directory.set_policies(policies);
                        info!(target: "keydex::system", "policies reloaded, effective at next epoch");
                    }
                    Err(e) => {
                        tracing::error!(target: "keydex::system", error = %e, "policy reload failed");
                    }
                },
                Err(e) => {
                    tracing::error!(target: "keydex::system", error = %e, "policy reload failed");
                }
            }
        }
    });

    #[cfg(not(unix))]
    let _ = (state, config_path);
}

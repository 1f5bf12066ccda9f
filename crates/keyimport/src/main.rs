#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use clap::{Parser, Subcommand, ValueEnum};
use eyre::Context as _;
use import::{ImportContext, ImportCoordinator, ImportEvent, KeyDecoder, Step, Submission};
use std::sync::Arc;
use tracing_subscriber::prelude::*;

mod cli_output;
mod config;
mod errors;
mod fsutil;
mod import;
mod keystore;
mod paths;
mod retry;
mod store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliAppMode {
    Online,
    Offline,
}

impl From<CliAppMode> for config::AppMode {
    fn from(v: CliAppMode) -> Self {
        match v {
            CliAppMode::Online => Self::Online,
            CliAppMode::Offline => Self::Offline,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "keyimport", version, about = "Import Bitcoin WIF private keys")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a WIF private key.
    ///
    /// The key is read from stdin when piped, otherwise from a hidden prompt. It is never
    /// accepted as an argument.
    Import {
        /// Override the configured app mode. `offline` skips address classification.
        #[arg(long, value_enum)]
        mode: Option<CliAppMode>,

        /// Emit the result as JSON on stdout.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Monitor an address without its private key.
    Watch { address: String },

    /// Check that a passphrase still opens the key stored for an address.
    Verify { address: String },

    /// List known addresses (no key material).
    List {
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print resolved paths (useful for debugging).
    Paths,
}

fn init_logging(paths: &paths::KeyImportPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_appender = tracing_appender::rolling::never(paths.log_dir(), paths.log_file_name());
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

async fn run_import(
    paths: &paths::KeyImportPaths,
    cfg: config::KeyImportConfig,
    mode: Option<CliAppMode>,
    json: bool,
) -> eyre::Result<()> {
    let registry = Arc::new(keystore::Keystore::open(paths.clone())?);
    let classifier =
        Arc::new(import::HttpClassifier::new(&cfg.classifier).context("classifier config")?);
    let ctx = ImportContext {
        mode: mode.map_or(cfg.app_mode, Into::into),
        decoder: KeyDecoder::new(cfg.network_mode),
        kdf: cfg.kdf,
        classifier,
        registry,
    };
    let mut coordinator =
        ImportCoordinator::new(ctx, Box::new(cli_output::TerminalSurface::new(json)));

    let raw = cli_output::read_private_key()?;
    let submitted = coordinator.submit(&raw);
    drop(raw);

    let mut step = match submitted {
        Submission::Finished(event) => Step::Finished(event),
        Submission::Busy => eyre::bail!("an import is already in progress"),
        Submission::Classifying | Submission::AwaitingPassphrase => {
            next_step_or_dismiss(&mut coordinator, json).await
        }
    };

    let mut receipt = None;
    loop {
        match step {
            Step::PassphraseRequired => match prompt_passphrase().await {
                Ok(Some(p)) => {
                    receipt = Some(p.receipt());
                    coordinator.passphrase_entered(p);
                }
                Ok(None) => {
                    coordinator.passphrase_cancelled();
                    cli_output::print_cancelled();
                    eyre::bail!("import cancelled");
                }
                Err(e) => {
                    coordinator.passphrase_cancelled();
                    return Err(e);
                }
            },
            Step::Cancelled => {
                cli_output::print_cancelled();
                eyre::bail!("import cancelled");
            }
            Step::Finished(event) => {
                if let Some(r) = &receipt {
                    tracing::debug!(
                        erased = r.is_erased(),
                        wipes = r.wipe_count(),
                        "passphrase erasure"
                    );
                }
                tracing::debug!(state = ?coordinator.state(), "import attempt finished");
                return match event {
                    ImportEvent::Succeeded { .. } => Ok(()),
                    ImportEvent::Failed(reason) => {
                        eyre::bail!("import failed ({})", errors::ImportNotice::from(&reason).code)
                    }
                };
            }
            Step::Idle => return Ok(()),
        }
        step = next_step_or_dismiss(&mut coordinator, json).await;
    }
}

/// Wait for the coordinator. On Ctrl-C the terminal output is detached; running work finishes
/// so nothing is left half-written, but the attempt goes no further than that.
async fn next_step_or_dismiss<C, R>(
    coordinator: &mut ImportCoordinator<C, R>,
    json: bool,
) -> Step
where
    C: import::AddressClassifier,
    R: import::AddressRegistry,
{
    tokio::select! {
        step = coordinator.next_step() => return step,
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::warn!(error = %e, "install Ctrl-C handler");
            }
        }
    }
    cli_output::print_interrupted();
    coordinator.dismiss();
    let step = coordinator.next_step().await;
    // The surface is gone, but the outcome of work that did run is still reported.
    if let Step::Finished(event) = &step {
        cli_output::print_notice(&cli_output::notice_for(event), json);
    }
    step
}

/// Ask for the passphrase off the runtime so Ctrl-C still ends the prompt. `Ok(None)` means
/// cancelled or interrupted.
///
/// The prompt runs on a detached thread: a terminal read cannot be aborted, and the thread must
/// not keep the process alive once the import has been abandoned.
async fn prompt_passphrase() -> eyre::Result<Option<import::Passphrase>> {
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    std::thread::Builder::new()
        .name("passphrase-prompt".to_owned())
        .spawn(move || {
            if tx.send(cli_output::read_passphrase()).is_err() {
                tracing::debug!("passphrase prompt abandoned");
            }
        })
        .context("spawn passphrase prompt")?;

    tokio::select! {
        res = &mut rx => return res.context("passphrase prompt")?,
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::warn!(error = %e, "install Ctrl-C handler");
                return rx.await.context("passphrase prompt")?;
            }
        }
    }
    Ok(None)
}

fn run_verify(registry: &keystore::Keystore, address: &str) -> eyre::Result<()> {
    let Some(mut passphrase) = cli_output::read_passphrase()? else {
        eyre::bail!("verification cancelled");
    };
    if !registry.check_passphrase(address.trim(), &mut passphrase)? {
        eyre::bail!("passphrase does not open the key stored for {address}");
    }
    cli_output::stdout_writeln(&format!("passphrase ok for {}", address.trim()))
}

fn run_list(registry: &keystore::Keystore, json: bool) -> eyre::Result<()> {
    let known = registry.list()?;
    if json {
        let s = serde_json::to_string_pretty(&known).context("serialize addresses")?;
        return cli_output::stdout_writeln(&s);
    }
    for k in known {
        let kind = match k.kind {
            keystore::AddressKind::WatchOnly => "watch-only",
            keystore::AddressKind::PrivateKey => "private-key",
        };
        cli_output::stdout_writeln(&format!("{}\t{kind}\t{}", k.address, k.since))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = paths::KeyImportPaths::discover()?;
    paths.ensure_private_dirs().context("create keyimport dirs")?;
    let _log_guard = init_logging(&paths);
    let cfg = store::ConfigStore::new(&paths).load_or_init_default()?;

    match cli.cmd {
        Command::Import { mode, json } => run_import(&paths, cfg, mode, json).await,
        Command::Watch { address } => {
            let registry = keystore::Keystore::open(paths)?;
            let added = registry.add_watch_only(&address, cfg.network_mode)?;
            cli_output::stdout_writeln(&format!("watching {added}"))
        }
        Command::Verify { address } => run_verify(&keystore::Keystore::open(paths)?, &address),
        Command::List { json } => run_list(&keystore::Keystore::open(paths)?, json),
        Command::Paths => {
            let s = serde_json::to_string(&serde_json::json!({
              "config_dir": paths.config_dir,
              "data_dir": paths.data_dir,
              "log_file": paths.log_file,
              "address_index": paths.address_index(),
            }))
            .context("serialize paths")?;
            cli_output::stdout_writeln(&s)
        }
    }
}

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use daemonbase::error::ExitError;
use log::{error, info};

use mockproxy::config::BootstrapConfig;
use mockproxy::log::{filter_from_verbosity, init as init_logging};
use mockproxy::manager::HostRegistry;
use mockproxy::store::{InMemoryStore, Store};

/// A programmable HTTP mocking and recording proxy.
#[derive(Parser, Debug)]
#[command(name = "mockproxy", version, about)]
struct Args {
    /// Path to the bootstrap config file describing instances to register.
    #[arg(short, long, value_name = "PATH")]
    config: String,

    /// Log more information; repeat for more (e.g. -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log less information; repeat for even less.
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "verbose")]
    quiet: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(filter_from_verbosity(args.verbose, args.quiet));

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(_exit_error) => ExitCode::FAILURE,
    }
}

fn run(args: Args) -> Result<(), ExitError> {
    let bootstrap = BootstrapConfig::from_file(&args.config).map_err(|err| {
        error!("failed to load config {}: {err}", args.config);
        ExitError::default()
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            error!("failed to start the async runtime: {err}");
            ExitError::default()
        })?;

    runtime.block_on(serve(bootstrap))
}

async fn serve(bootstrap: BootstrapConfig) -> Result<(), ExitError> {
    let store = Arc::new(InMemoryStore::new());
    for descriptor in &bootstrap.instances {
        store.proxy_server_create(descriptor.clone().into_instance_config()).map_err(|err| {
            error!("failed to register instance: {err}");
            ExitError::default()
        })?;
    }

    let registry = HostRegistry::new(store);
    registry.load().map_err(|err| {
        error!("failed to load instances: {err}");
        ExitError::default()
    })?;
    registry.start_all().await.map_err(|err| {
        error!("failed to start instances: {err}");
        ExitError::default()
    })?;

    for instance in registry.find_all() {
        info!(
            "instance {} listening on port {}",
            instance.id(), instance.listening_port(),
        );
    }

    tokio::signal::ctrl_c().await.map_err(|err| {
        error!("failed to install signal handler: {err}");
        ExitError::default()
    })?;
    info!("shutting down");
    registry.stop_all().await.map_err(|err| {
        error!("failed to stop instances cleanly: {err}");
        ExitError::default()
    })?;
    Ok(())
}

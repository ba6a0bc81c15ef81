use std::process::ExitCode;

use tracing::{error, info};

use tokio_webfs::config::Config;
use tokio_webfs::{lifecycle, logging, Server};

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::from(2);
        }
    };

    logging::init(&config.logging);
    info!("Starting tokio_webfs {}", tokio_webfs::VERSION);
    config.log_summary();

    // Startup forks when detaching, so it runs before any runtime exists.
    let ready = match lifecycle::startup(config) {
        Ok(ready) => ready,
        Err(e) => {
            error!("Startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let handle = match Server::start(ready) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build signal runtime: {}", e);
            handle.shutdown();
            handle.join();
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(wait_for_signal());
    info!("Shutting down...");
    handle.shutdown();
    handle.join();

    ExitCode::SUCCESS
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

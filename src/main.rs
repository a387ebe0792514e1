//! pppoat command-line entry point

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use pppoat::utils::{cancel_on_shutdown_signal, init_logging_from_config};
use pppoat::{Cli, FileConfig, ModuleRegistry, SessionConfig, Tunnel};

/// Exit status for configuration errors
const EXIT_CONFIG: u8 = 2;
/// Exit status for resource and runtime errors
const EXIT_RUNTIME: u8 = 1;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.list {
        let stdout = std::io::stdout();
        return match ModuleRegistry::builtin().write_listing(&mut stdout.lock()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("pppoat: {}", e);
                ExitCode::from(EXIT_RUNTIME)
            }
        };
    }

    let file = match cli.config.as_deref().map(FileConfig::from_toml_file).transpose() {
        Ok(file) => file,
        Err(e) => {
            eprintln!("pppoat: {:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    init_logging_from_config(
        file.as_ref().and_then(|f| f.logging.as_ref()),
        cli.log_filter.as_deref(),
    );

    let session = match cli.session_config(file.as_ref()) {
        Ok(session) => session,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("pppoat: {:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    // Only signal handling runs on the runtime; the tunnel itself is blocking
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("pppoat: failed to start runtime: {}", e);
            return ExitCode::from(EXIT_RUNTIME);
        }
    };
    runtime.block_on(run(session))
}

async fn run(session: SessionConfig) -> ExitCode {
    let shutdown = CancellationToken::new();
    let signals = tokio::spawn(cancel_on_shutdown_signal(shutdown.clone()));

    let token = shutdown.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        Tunnel::new(ModuleRegistry::builtin()).run(&session, &token)
    })
    .await;

    // Lets the signal task return
    shutdown.cancel();
    let _ = signals.await;

    match outcome {
        Ok(Ok(())) => {
            info!("Tunnel closed");
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            eprintln!("pppoat: {}", e);
            if e.is_config_error() {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::from(EXIT_RUNTIME)
            }
        }
        Err(e) => {
            error!("Tunnel thread failed: {}", e);
            ExitCode::from(EXIT_RUNTIME)
        }
    }
}

//! CLI entry point - the composition root.
//!
//! This is the only place where infrastructure is wired together: the
//! tracing subscriber, the shared cookie jar, signal handling, and the
//! controller with its agent pool. Shutdown chores (cookie save,
//! delete-after cleanup, blacklist dump) also live here.

mod parser;

use std::sync::Arc;

use clap::Parser as _;
use tokio_util::sync::CancellationToken;

use quarry_engine::Controller;
use quarry_net::cookies::CookieJar;

use parser::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cfg = Arc::new(cli.to_config()?);
    cfg.validate()?;

    let jar = Arc::new(CookieJar::new());
    let terminate = CancellationToken::new();
    spawn_signal_handlers(terminate.clone());

    let mut controller = Controller::new(Arc::clone(&cfg), Arc::clone(&jar), terminate)?;
    for uri in &cli.uris {
        controller.add_root_uri(uri)?;
    }
    controller.run().await?;

    if let Some(path) = &cfg.save_cookies {
        if let Err(e) = jar.save(path, cfg.keep_session_cookies) {
            tracing::error!("failed to save cookies: {e}");
        }
    }

    if cfg.delete_after {
        if let Some(output) = &cfg.output_document {
            if output != "-" {
                let _ = std::fs::remove_file(output);
            }
        }
    }

    if cfg.debug {
        for uri in controller.blacklist().iter() {
            tracing::debug!("blacklist: {uri}");
        }
    }

    Ok(())
}

/// SIGTERM starts an orderly drain; SIGINT aborts outright.
fn spawn_signal_handlers(terminate: CancellationToken) {
    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
                tracing::info!("# SIGTERM - draining");
                terminate.cancel();
            }
            Err(e) => tracing::error!("failed to install SIGTERM handler: {e}"),
        }
    });
    #[cfg(not(unix))]
    drop(terminate);

    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            // developer safety net
            std::process::abort();
        }
    });
}

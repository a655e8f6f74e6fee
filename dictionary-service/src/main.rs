use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use dictionary_service::{
    cli::{Cli, Command, ServerArgs},
    console,
    server::Server,
    store::{MemoryStore, load_seed},
};

fn init_tracing(command: &Command) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_target(false);
    // The console owns stdout in client mode.
    let _ = match command {
        Command::Client(_) => subscriber.with_writer(std::io::stderr).try_init(),
        Command::Server(_) => subscriber.try_init(),
    };
}

async fn serve(args: ServerArgs) -> Result<()> {
    let store = match &args.seed {
        Some(path) => {
            let words = load_seed(path)
                .with_context(|| format!("failed to load seed file {}", path.display()))?;
            MemoryStore::from_words(words)
        }
        None => MemoryStore::new(),
    };
    let entries = store.len();

    let server = Server::bind(args.listen, Arc::new(store)).await?;
    let addr = server.local_addr()?;
    info!("server listening on {}", addr);
    info!(entries, "dictionary loaded");

    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("server exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.command);

    match cli.command {
        Command::Server(args) => serve(args).await?,
        Command::Client(args) => console::run(args).await?,
    }

    Ok(())
}

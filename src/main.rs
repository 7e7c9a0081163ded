// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};
use troupe_model::{MockProvider, ModelProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = troupe_config::load(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::ShowConfig) => {
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Some(Commands::Serve { addr }) => {
            if let Some(addr) = addr {
                config.node.bind_addr = addr;
            }
            serve(config).await
        }
        None => serve(config).await,
    }
}

async fn serve(config: troupe_config::Config) -> anyhow::Result<()> {
    // Real provider clients are deployment-specific and registered here;
    // the built-in mock keeps a bare checkout runnable end to end
    // (TROUPE_LLM_PROVIDER=mock).
    let providers: Vec<Arc<dyn ModelProvider>> = vec![Arc::new(MockProvider)];
    let state = troupe_node::build_state(config, providers).await?;
    troupe_node::serve(state).await
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

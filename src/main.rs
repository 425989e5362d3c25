// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tally - streaming financial co-pilot
//!
//! Entry point for the Tally CLI application.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tally::cli::{Cli, Commands};
use tally::commands;
use tally::error::Result;

/// Default log filter for a verbosity count. `RUST_LOG` wins when set.
fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn,tally=info",
        1 => "info,tally=debug",
        _ => "debug,tally=trace",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(cli.verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let settings_path = commands::settings_path(cli.config.as_deref());
    let settings = commands::load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve(args) => commands::serve::execute(&args, settings).await,
        Commands::Chat(args) => commands::chat::run_chat(args, settings).await,
        Commands::Ask(args) => commands::chat::run_ask(args, settings).await,
        Commands::Conversations(args) => commands::conversations::execute(args, settings).await,
        Commands::Settings(args) => commands::settings::execute(&args, &settings, &settings_path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_levels() {
        assert_eq!(default_filter(0), "warn,tally=info");
        assert_eq!(default_filter(1), "info,tally=debug");
        assert_eq!(default_filter(5), "debug,tally=trace");
    }
}

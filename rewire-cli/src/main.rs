// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Leif Rydenfalk – https://github.com/Leif-Rydenfalk/rewire

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use rewire_cli::commands::{self, shutdown_on_ctrl_c};
use rewire_cli::{init_logging, CliConfig, Control, Endpoint};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rewire")]
#[command(about = "Role-inverting connections and tunneled socket sessions")]
#[command(version)]
struct Cli {
    /// Per call timeout, e.g. "30s" or "1m 30s" (default: REWIRE_TIMEOUT_MS or 60s)
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Remove sessions from the table when they are closed
    #[arg(long, global = true)]
    evict_closed: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve tunnel sessions on a listening address (host:port or unix:/path)
    Serve {
        #[arg(long)]
        listen: Endpoint,
    },
    /// Serve tunnel sessions by dialing out to a client that listens
    ReverseServe {
        #[arg(long)]
        target: Endpoint,
    },
    /// Open a remote socket through a tunnel server and copy it to stdout
    Cat {
        #[command(flatten)]
        control: ControlArgs,
        #[arg(long, default_value = "tcp")]
        network: String,
        #[arg(long)]
        address: String,
    },
    /// Check that a tunnel server answers
    Ping {
        #[command(flatten)]
        control: ControlArgs,
    },
}

#[derive(Args)]
struct ControlArgs {
    /// Dial the tunnel server at this address
    #[arg(long, conflicts_with = "accept", required_unless_present = "accept")]
    connect: Option<Endpoint>,
    /// Listen here and wait for a reverse-serving tunnel server to dial in
    #[arg(long)]
    accept: Option<Endpoint>,
}

impl ControlArgs {
    fn into_control(self) -> Control {
        match (self.connect, self.accept) {
            (Some(endpoint), _) => Control::Connect(endpoint),
            (None, Some(endpoint)) => Control::Accept(endpoint),
            // clap rejects a command line with neither flag
            (None, None) => unreachable!("--connect or --accept is required"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = CliConfig::from_env()?;
    if let Some(timeout) = cli.timeout {
        config.timeout = timeout;
    }
    if cli.evict_closed {
        config.close_policy = rewire_model::ClosePolicy::Evict;
    }
    config.log_json |= cli.json_logs;
    init_logging(config.log_json);

    match cli.command {
        Commands::Serve { listen } => commands::serve(listen, &config, shutdown_on_ctrl_c()).await,
        Commands::ReverseServe { target } => {
            commands::reverse_serve(target, &config, shutdown_on_ctrl_c()).await
        }
        Commands::Cat {
            control,
            network,
            address,
        } => commands::cat(control.into_control(), network, address, &config).await,
        Commands::Ping { control } => {
            let greeting = commands::health(control.into_control(), &config).await?;
            println!("{}", greeting);
            Ok(())
        }
    }
}

//! smartwire-cli - one-shot commands against a smart server.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::Output;
use smartwire_client::{ClientMedium, MediumConfig, RemoteTransport, SshParams};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "smartwire-cli")]
#[command(about = "Command-line client for smartwire smart servers")]
#[command(version)]
struct Cli {
    /// Server address (HOST:PORT)
    #[arg(long, env = "SMARTWIRE_SERVER", conflicts_with = "ssh")]
    tcp: Option<String>,

    /// Start the server over SSH ([USER@]HOST[:PORT])
    #[arg(long)]
    ssh: Option<String>,

    /// Path on the server that relative paths resolve against
    #[arg(short, long, default_value = "")]
    base: String,

    /// Connect timeout in seconds
    #[arg(long, default_value = "10")]
    connect_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check the server speaks protocol version 1
    Hello,

    /// Check whether a path exists
    Has { path: String },

    /// Print a file
    Get {
        path: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a file from FILE or stdin
    Put {
        path: String,

        /// Source file (default: stdin)
        file: Option<PathBuf>,

        /// Permission bits in octal, e.g. 644
        #[arg(short, long, value_parser = commands::parse_octal)]
        mode: Option<u32>,

        /// Write in place instead of replacing atomically
        #[arg(long)]
        non_atomic: bool,

        /// Create the parent directory if missing (with --non-atomic)
        #[arg(long, requires = "non_atomic")]
        create_parents: bool,
    },

    /// Append FILE or stdin to a file
    Append {
        path: String,

        /// Source file (default: stdin)
        file: Option<PathBuf>,
    },

    /// Delete a file
    Rm { path: String },

    /// Create a directory
    Mkdir {
        path: String,

        /// Permission bits in octal, e.g. 755
        #[arg(short, long, value_parser = commands::parse_octal)]
        mode: Option<u32>,
    },

    /// Remove an empty directory
    Rmdir { path: String },

    /// Move a path, replacing the target
    Mv { from: String, to: String },

    /// Rename a path; fails if the target exists
    Rename { from: String, to: String },

    /// Show size and mode
    Stat { path: String },

    /// List a directory
    Ls {
        #[arg(default_value = "")]
        path: String,
    },

    /// List every file below a directory
    Find {
        #[arg(default_value = "")]
        path: String,
    },

    /// Read ranges of a file
    Readv {
        path: String,

        /// Ranges as OFFSET:LEN
        #[arg(required = true, value_parser = commands::parse_range)]
        ranges: Vec<(u64, u64)>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config =
        MediumConfig::new().with_connect_timeout(Duration::from_secs(cli.connect_timeout));
    let medium = match (&cli.ssh, &cli.tcp) {
        (Some(target), _) => ClientMedium::ssh(SshParams::parse(target).map_err(|e| {
            eprintln!("{}: {}", "Error".red(), e);
            e
        })?),
        (None, Some(addr)) => ClientMedium::tcp(addr.clone()),
        (None, None) => ClientMedium::tcp(format!(
            "127.0.0.1:{}",
            smartwire_protocol::DEFAULT_PORT
        )),
    }
    .with_config(config);
    let mut transport = RemoteTransport::new(medium).with_base(cli.base);

    tracing::debug!(base = %transport.base(), "executing command");
    let result = commands::execute(&mut transport, cli.command).await;
    transport.disconnect().await;
    if let Err(e) = &result {
        tracing::debug!(error = ?e, "command failed");
    }

    match result {
        Ok(Output::Text(text)) => {
            if !text.is_empty() {
                println!("{}", text);
            }
        }
        Ok(Output::Raw(bytes)) => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}

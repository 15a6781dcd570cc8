//! Command execution.

use crate::Commands;
use bytes::Bytes;
use colored::Colorize;
use smartwire_client::RemoteTransport;
use smartwire_protocol::Stat;
use std::io::Read;
use std::path::Path;

/// What a command prints.
pub enum Output {
    Text(String),
    /// File contents, written to stdout untouched.
    Raw(Bytes),
}

/// Executes a command and returns its output.
pub async fn execute(
    transport: &mut RemoteTransport,
    cmd: Commands,
) -> Result<Output, Box<dyn std::error::Error>> {
    let text = match cmd {
        Commands::Hello => {
            let version = transport.query_version().await?;
            format!("{} protocol version {}", "OK".green(), version)
        }

        Commands::Has { path } => {
            if transport.has(&path).await? {
                format!("{} {}", "yes".green(), path.cyan())
            } else {
                format!("{} {}", "no".yellow(), path.cyan())
            }
        }

        Commands::Get { path, output } => {
            let bytes = transport.get_bytes(&path).await?;
            match output {
                Some(file) => {
                    std::fs::write(&file, &bytes)?;
                    format!(
                        "{} {} to {}",
                        "Wrote".green(),
                        format_bytes(bytes.len() as u64),
                        file.display()
                    )
                }
                None => return Ok(Output::Raw(bytes)),
            }
        }

        Commands::Put {
            path,
            file,
            mode,
            non_atomic,
            create_parents,
        } => {
            let data = read_input(file.as_deref())?;
            if non_atomic {
                transport
                    .put_bytes_non_atomic(&path, &data, mode, create_parents, None)
                    .await?;
            } else {
                transport.put_bytes(&path, &data, mode).await?;
            }
            format!(
                "{} {} ({})",
                "Stored".green(),
                path.cyan(),
                format_bytes(data.len() as u64)
            )
        }

        Commands::Append { path, file } => {
            let data = read_input(file.as_deref())?;
            let offset = transport.append_bytes(&path, &data, None).await?;
            format!(
                "{} {} to {} at offset {}",
                "Appended".green(),
                format_bytes(data.len() as u64),
                path.cyan(),
                offset
            )
        }

        Commands::Rm { path } => {
            transport.delete(&path).await?;
            format!("{} {}", "Deleted".green(), path.cyan())
        }

        Commands::Mkdir { path, mode } => {
            transport.mkdir(&path, mode).await?;
            format!("{} {}", "Created".green(), path.cyan())
        }

        Commands::Rmdir { path } => {
            transport.rmdir(&path).await?;
            format!("{} {}", "Removed".green(), path.cyan())
        }

        Commands::Mv { from, to } => {
            transport.move_path(&from, &to).await?;
            format!("{} {} -> {}", "Moved".green(), from.cyan(), to.cyan())
        }

        Commands::Rename { from, to } => {
            transport.rename(&from, &to).await?;
            format!("{} {} -> {}", "Renamed".green(), from.cyan(), to.cyan())
        }

        Commands::Stat { path } => {
            let stat = transport.stat(&path).await?;
            format_stat(&path, &stat)
        }

        Commands::Ls { path } => {
            let names = transport.list_dir(&path).await?;
            if names.is_empty() {
                "(empty)".dimmed().to_string()
            } else {
                names.join("\n")
            }
        }

        Commands::Find { path } => transport.iter_files_recursive(&path).await?.join("\n"),

        Commands::Readv { path, ranges } => {
            let pieces = transport.readv(&path, &ranges).await?;
            pieces
                .iter()
                .map(|(offset, data)| {
                    format!(
                        "{} {}",
                        format!("{}:{}", offset, data.len()).cyan(),
                        String::from_utf8_lossy(data)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
    };
    Ok(Output::Text(text))
}

/// Parses an octal permission mode such as `644` or `0o755`.
pub fn parse_octal(arg: &str) -> Result<u32, String> {
    let digits = arg.strip_prefix("0o").unwrap_or(arg);
    u32::from_str_radix(digits, 8).map_err(|_| format!("not an octal mode: {}", arg))
}

/// Parses a readv range written as `OFFSET:LEN`.
pub fn parse_range(arg: &str) -> Result<(u64, u64), String> {
    let (offset, length) = arg
        .split_once(':')
        .ok_or_else(|| format!("expected OFFSET:LEN, got {}", arg))?;
    let offset = offset
        .parse()
        .map_err(|_| format!("bad offset in {}", arg))?;
    let length = length
        .parse()
        .map_err(|_| format!("bad length in {}", arg))?;
    Ok((offset, length))
}

/// Reads a file, or stdin when no file is given.
fn read_input(file: Option<&Path>) -> std::io::Result<Vec<u8>> {
    match file {
        Some(path) => std::fs::read(path),
        None => {
            let mut data = Vec::new();
            std::io::stdin().read_to_end(&mut data)?;
            Ok(data)
        }
    }
}

fn format_stat(path: &str, stat: &Stat) -> String {
    let kind = match stat.mode & 0o170000 {
        0o040000 => "directory",
        0o100000 => "file",
        _ => "other",
    };
    format!(
        "{}\n  size: {} ({})\n  mode: {}\n  kind: {}",
        path.bold(),
        stat.size,
        format_bytes(stat.size),
        stat.mode_to_wire(),
        kind
    )
}

/// Formats bytes as human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

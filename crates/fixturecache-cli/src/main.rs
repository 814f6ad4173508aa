//! fixturecache - maintenance commands for the viewer's offline cache.
//!
//! Lists what is stored on disk and how old it is, prints individual records
//! and removes them, always going through the same `CacheManager` the viewer
//! uses.

use std::io;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fixturecache_core::{CacheManager, Config};

const USAGE: &str = "\
Usage: fixturecache <command>

Commands:
  ages            List cached keys and when they were last updated
  show <key>      Print the cached payload for a key
  remove <key>    Remove a key from the cache
  clear           Remove every cached key";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

/// A maintenance command parsed from the command line.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Ages,
    Show(String),
    Remove(String),
    Clear,
}

fn parse_command(args: &[String]) -> Option<Command> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["ages"] => Some(Command::Ages),
        ["show", key] => Some(Command::Show(key.to_string())),
        ["remove", key] => Some(Command::Remove(key.to_string())),
        ["clear"] => Some(Command::Clear),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = parse_command(&args) else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    let config = Config::load()?;
    let cache = config.open_cache()?;
    info!(cache_dir = ?config.cache_dir()?, "Cache opened");

    match command {
        Command::Ages => print_ages(&cache).await,
        Command::Show(key) => show(&cache, &key).await,
        Command::Remove(key) => {
            cache.remove(&key).await?;
            eprintln!("Removed {}", key);
            Ok(())
        }
        Command::Clear => {
            cache.clear().await?;
            eprintln!("Cache cleared");
            Ok(())
        }
    }
}

async fn print_ages(cache: &CacheManager) -> Result<()> {
    let keys = cache.store().keys().await?;
    if keys.is_empty() {
        println!("Cache is empty");
        return Ok(());
    }

    let width = keys.iter().map(String::len).max().unwrap_or(0);
    for key in keys {
        match cache.store().load(&key).await {
            Ok(Some(record)) => println!(
                "{:<width$}  {:>10}  {}",
                key,
                record.age_display(),
                record.written_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            ),
            Ok(None) => println!("{:<width$}  {:>10}", key, "missing"),
            Err(e) => println!("{:<width$}  {:>10}  {}", key, "unreadable", e),
        }
    }
    Ok(())
}

async fn show(cache: &CacheManager, key: &str) -> Result<()> {
    let record = cache
        .store()
        .load(key)
        .await?
        .with_context(|| format!("No cached record for {}", key))?;

    let payload: serde_json::Value =
        serde_json::from_slice(&record.payload).context("Cached payload is not valid JSON")?;
    eprintln!("{} (updated {})", key, record.age_display());
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command(&args(&["ages"])), Some(Command::Ages));
        assert_eq!(
            parse_command(&args(&["show", "houses"])),
            Some(Command::Show("houses".to_string()))
        );
        assert_eq!(
            parse_command(&args(&["remove", "results"])),
            Some(Command::Remove("results".to_string()))
        );
        assert_eq!(parse_command(&args(&["clear"])), Some(Command::Clear));
    }

    #[test]
    fn test_parse_command_rejects_unknown() {
        assert_eq!(parse_command(&args(&[])), None);
        assert_eq!(parse_command(&args(&["show"])), None);
        assert_eq!(parse_command(&args(&["purge"])), None);
        assert_eq!(parse_command(&args(&["clear", "now"])), None);
    }
}

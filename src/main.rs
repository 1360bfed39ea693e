//! pagestore-rs: maintenance tool for disk page stores.
//!
//! Reads the index a page store leaves behind on shutdown, or removes the
//! store of an application altogether.

use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use pagestore_rs::storage::{decode_file_name, read_index};
use pagestore_rs::{Args, Command, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Parse command-line arguments
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug {
        Level::DEBUG
    } else if args.silent {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let command = args.command.clone();
    let config = Config::from(args);

    match command {
        Command::Inspect { session } => inspect(&config, session.as_deref()).await,
        Command::Purge => purge(&config).await,
    }
}

async fn inspect(
    config: &Config,
    session: Option<&str>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let store_folder = config.store_folder();
    let index = match read_index(&store_folder).await? {
        Some(index) => index,
        None => {
            warn!(
                "No index in {:?}, the store is running or was not shut down cleanly",
                store_folder
            );
            return Ok(());
        }
    };

    println!("Index written at {}", index.written_at);
    println!(
        "{} sessions, {} bytes",
        index.sessions.len(),
        index.total_size()
    );

    for (session_id, page_maps) in &index.sessions {
        if session.map(|s| s != session_id).unwrap_or(false) {
            continue;
        }
        println!();
        println!("session {}", session_id);
        for entry in page_maps {
            let file_name = entry
                .file_name
                .file_name()
                .map(|name| decode_file_name(&name.to_string_lossy()))
                .unwrap_or_default();
            println!(
                "  page map '{}' ({}): {} of {} bytes",
                entry.page_map_name,
                file_name,
                entry.manager.total_size(),
                entry.manager.max_size()
            );
            for window in entry.manager.page_windows() {
                println!(
                    "    page {} v{}.{} at {}..{}",
                    window.page_id,
                    window.version_number,
                    window.ajax_version_number,
                    window.file_part_offset,
                    window.end()
                );
            }
        }
    }
    Ok(())
}

async fn purge(config: &Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let store_folder = config.store_folder();
    match tokio::fs::remove_dir_all(&store_folder).await {
        Ok(()) => info!("Removed {:?}", store_folder),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("Nothing to remove at {:?}", store_folder)
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

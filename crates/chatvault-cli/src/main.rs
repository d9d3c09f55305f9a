//! ChatVault command-line tool for inspecting and maintaining chat stores.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use chatvault_core::{ChatVaultConfig, OpContext};
use chatvault_store::ChatStore;

mod commands;

fn resolve_data_dir() -> PathBuf {
    std::env::var("CHATVAULT_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let exe_dir = std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|p| p.to_path_buf()));
            if let Some(dir) = exe_dir {
                let parent_data = dir.join("../data");
                if parent_data.exists() {
                    return parent_data;
                }
            }
            PathBuf::from("data")
        })
}

fn print_help() {
    println!("ChatVault: per-chat message and document vector store");
    println!();
    println!("Usage: chatvault <command> [args]");
    println!();
    println!("Commands:");
    println!("  list                     List chats, newest first");
    println!("  show <chat-id>           Print a chat's metadata as JSON");
    println!("  messages <chat-id>       Print a chat's messages in order");
    println!("  stats <chat-id>          Print message, document and index counts");
    println!("  delete <chat-id>         Delete a chat and all its data");
    println!("  help                     Show this help message");
    println!();
    println!("Data directory: $CHATVAULT_DATA_DIR (default ./data)");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match commands::Command::parse(&args) {
        Ok(Some(command)) => command,
        Ok(None) => {
            print_help();
            return Ok(());
        }
        Err(usage) => {
            eprintln!("{}", usage);
            std::process::exit(1);
        }
    };

    let data_dir = resolve_data_dir();
    info!("Data directory: {}", data_dir.display());

    let config = ChatVaultConfig::from_env(&data_dir)?;
    let store = Arc::new(ChatStore::new(config));

    // Ctrl-C interrupts whatever storage call is in flight.
    let ctx = OpContext::background();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let worker = store.clone();
    let output = tokio::task::spawn_blocking(move || command.run(&worker, &ctx)).await??;
    print!("{}", output);

    store.close()?;
    Ok(())
}

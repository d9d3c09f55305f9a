//! Subcommand parsing and execution. Each command renders its output to a
//! string so it can be checked without a terminal.

use std::fmt::Write as _;

use chatvault_core::OpContext;
use chatvault_store::ChatStore;

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    List,
    Show(String),
    Messages(String),
    Stats(String),
    Delete(String),
}

impl Command {
    /// `Ok(None)` means the user asked for help.
    pub fn parse(args: &[String]) -> Result<Option<Self>, String> {
        let Some(name) = args.first() else {
            return Ok(None);
        };
        let chat_id = || {
            args.get(1)
                .cloned()
                .ok_or_else(|| format!("Usage: chatvault {} <chat-id>", name))
        };

        let command = match name.as_str() {
            "--help" | "-h" | "help" => return Ok(None),
            "list" => Self::List,
            "show" => Self::Show(chat_id()?),
            "messages" => Self::Messages(chat_id()?),
            "stats" => Self::Stats(chat_id()?),
            "delete" => Self::Delete(chat_id()?),
            other => {
                return Err(format!(
                    "Unknown command: {}. Use 'chatvault help' for usage.",
                    other
                ))
            }
        };
        Ok(Some(command))
    }

    pub fn run(&self, store: &ChatStore, ctx: &OpContext) -> anyhow::Result<String> {
        let mut out = String::new();
        match self {
            Self::List => {
                let chats = store.list_chats(ctx)?;
                if chats.is_empty() {
                    writeln!(out, "No chats.")?;
                }
                for chat in chats {
                    writeln!(
                        out,
                        "{}  {}  {}  ({} files)",
                        chat.id,
                        chat.created_at.format("%Y-%m-%d %H:%M"),
                        chat.name,
                        chat.file_count
                    )?;
                }
            }
            Self::Show(chat_id) => {
                let chat = store.get_chat(ctx, chat_id)?;
                writeln!(out, "{}", serde_json::to_string_pretty(&chat)?)?;
            }
            Self::Messages(chat_id) => {
                store.get_chat(ctx, chat_id)?;
                let session = store.open_chat(ctx, chat_id)?;
                for message in session.get_messages(ctx)? {
                    let marker = if message.has_embedding() { ' ' } else { '*' };
                    writeln!(
                        out,
                        "[{}]{} {:>9}: {}",
                        message.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        marker,
                        message.role,
                        message.content
                    )?;
                }
                session.close()?;
            }
            Self::Stats(chat_id) => {
                store.get_chat(ctx, chat_id)?;
                let session = store.open_chat(ctx, chat_id)?;
                let stats = session.stats(ctx)?;
                session.close()?;

                writeln!(out, "=== Chat {} ===", stats.chat_id)?;
                writeln!(out)?;
                writeln!(out, "Messages:           {}", stats.messages)?;
                writeln!(out, "  embedded:         {}", stats.embedded_messages)?;
                writeln!(out, "Documents:          {}", stats.documents)?;
                writeln!(out, "Chunks:             {}", stats.chunks)?;
                writeln!(out, "  embedded:         {}", stats.embedded_chunks)?;
                writeln!(out, "Message index:      {}", stats.message_index_size)?;
                writeln!(out, "Chunk index:        {}", stats.chunk_index_size)?;
                writeln!(out, "Database:           {}", stats.db_path)?;
            }
            Self::Delete(chat_id) => {
                store.delete_chat(ctx, chat_id)?;
                writeln!(out, "Deleted chat {}", chat_id)?;
            }
        }
        Ok(out)
    }
}

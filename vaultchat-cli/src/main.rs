//! vaultchat-cli: terminal client for a VaultChat server
//!
//! # Subcommands
//! - `history [--json]`     list this client's saved sessions
//! - `send <text> [--json]` send one user message and print the reply
//!
//! `--client-id` sets the identity header the server partitions history by,
//! the same way an edge proxy would.

use clap::{Parser, Subcommand};
use vaultchat_core::{ChatMessage, SessionRecord};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8787";
const IDENTITY_HEADER: &str = "CF-Connecting-IP";
const PREVIEW_CHARS: usize = 30;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "vaultchat-cli", version, about = "VaultChat terminal client")]
struct Cli {
    /// VaultChat server URL (overrides VAULTCHAT_URL env var)
    #[arg(long, env = "VAULTCHAT_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Value sent in the identity header; omitted when unset
    #[arg(long, env = "VAULTCHAT_CLIENT_ID")]
    client_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List saved sessions for this client
    History {
        /// Print the raw JSON array, including undecryptable entries
        #[arg(long)]
        json: bool,
    },

    /// Send a single user message
    Send {
        /// Message text
        text: String,

        /// Print the upstream's raw JSON reply
        #[arg(long)]
        json: bool,
    },
}

// ============================================================================
// Formatting
// ============================================================================

/// One line per displayable session: timestamp and first-message preview.
/// Sessions without data are skipped.
pub fn history_lines(records: &[SessionRecord]) -> Vec<String> {
    records
        .iter()
        .filter(|r| r.data.is_some())
        .map(|r| {
            let when = r
                .created_at()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "unknown time".to_string());
            let preview = r
                .preview(PREVIEW_CHARS)
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| "(no content)".to_string());
            format!("{}  {}...", when, preview)
        })
        .collect()
}

/// Text of the first choice in an OpenAI-style completion, or the upstream's
/// error message when it sent one instead.
pub fn extract_reply(body: &serde_json::Value) -> Option<String> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .or_else(|| body["error"]["message"].as_str())
        .or_else(|| body["error"].as_str())
        .map(str::to_string)
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn build_client() -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()?)
}

fn with_identity(
    req: reqwest::blocking::RequestBuilder,
    client_id: Option<&str>,
) -> reqwest::blocking::RequestBuilder {
    match client_id {
        Some(id) => req.header(IDENTITY_HEADER, id),
        None => req,
    }
}

fn do_history(server: &str, client_id: Option<&str>, json_output: bool) -> anyhow::Result<()> {
    let client = build_client()?;
    let url = format!("{}/history", server);

    let resp = match with_identity(client.get(&url), client_id).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("vaultchat-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        eprintln!("vaultchat-cli: server returned {}: {}", status, body);
        std::process::exit(1);
    }

    let body: serde_json::Value = resp.json()?;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let records: Vec<SessionRecord> = serde_json::from_value(body)?;
    let lines = history_lines(&records);
    if lines.is_empty() {
        eprintln!("No saved sessions");
    }
    for line in lines {
        println!("{}", line);
    }

    Ok(())
}

fn do_send(server: &str, client_id: Option<&str>, text: &str, json_output: bool) -> anyhow::Result<()> {
    let client = build_client()?;
    let body = serde_json::json!({ "messages": [ChatMessage::new("user", text)] });

    let resp = match with_identity(client.post(server), client_id).json(&body).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("vaultchat-cli: connection failed to {}: {}", server, e);
            std::process::exit(1);
        }
    };

    let status = resp.status();
    let reply: serde_json::Value = resp.json()?;
    if !status.is_success() {
        eprintln!("vaultchat-cli: server returned {}: {}", status, reply);
        std::process::exit(1);
    }

    if json_output {
        println!("{}", serde_json::to_string_pretty(&reply)?);
    } else {
        match extract_reply(&reply) {
            Some(text) => println!("{}", text),
            None => println!("{}", reply),
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();
    let client_id = cli.client_id.as_deref();

    let result = match cli.command {
        Commands::History { json } => do_history(&server, client_id, json),
        Commands::Send { text, json } => do_send(&server, client_id, &text, json),
    };

    if let Err(e) = result {
        eprintln!("vaultchat-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

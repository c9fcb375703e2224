//! glaze-cli: command-line client for the Glaze support chat API
//!
//! Talks to a running `glaze-server` over HTTP. Useful for smoke-testing a
//! deployment and for loading catalogues from a terminal.
//!
//! # Subcommands
//! - `ask <message> [--session <id>] [--json]` — grounded answer with sources
//! - `stream <message> [--session <id>]`       — answer printed as it is generated
//! - `history <session> [--json]`              — turns of a chat session
//! - `upload <file> [--multipart]`              — load a catalogue (admin token)
//! - `status`                                   — server and database health

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:3001";
const DEFAULT_SESSION: &str = "glaze-cli";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "glaze-cli", version, about = "Glaze porcelain support chat client")]
struct Cli {
    /// Glaze HTTP server URL (overrides GLAZE_HTTP_URL env var)
    #[arg(long, env = "GLAZE_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ask a question and print the grounded answer
    Ask {
        message: String,

        /// Chat session to continue
        #[arg(short, long, env = "GLAZE_SESSION_ID", default_value = DEFAULT_SESSION)]
        session: String,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Ask a question and print the answer as it streams
    Stream {
        message: String,

        #[arg(short, long, env = "GLAZE_SESSION_ID", default_value = DEFAULT_SESSION)]
        session: String,
    },

    /// Show the messages of a chat session
    History {
        session: String,

        #[arg(long)]
        json: bool,
    },

    /// Upload a catalogue JSON file
    Upload {
        file: PathBuf,

        /// Admin bearer token
        #[arg(long, env = "GLAZE_ADMIN_TOKEN")]
        token: Option<String>,

        /// Send as a multipart form instead of a JSON body
        #[arg(long)]
        multipart: bool,
    },

    /// Show server and database health
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct Provenance {
    pub product_id: String,
    pub source_type: String,
    pub source_id: Option<String>,
    pub similarity: f64,
}

#[derive(Debug, Deserialize)]
pub struct ChatReply {
    pub answer: String,
    #[serde(default)]
    pub provenance: Vec<Provenance>,
    #[serde(default)]
    pub retrieved_docs: usize,
    #[serde(rename = "conversationId")]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryReply {
    pub session_id: String,
    pub messages: Vec<HistoryMessage>,
}

// ============================================================================
// Output formatting
// ============================================================================

/// Answer followed by a numbered source list.
pub fn render_reply(reply: &ChatReply) -> String {
    let mut out = reply.answer.trim_end().to_string();
    if reply.provenance.is_empty() {
        return out;
    }
    out.push_str("\n\nSources:");
    for (n, p) in reply.provenance.iter().enumerate() {
        out.push_str(&format!(
            "\n  {}. product {} ({}{}) {:.0}%",
            n + 1,
            p.product_id,
            p.source_type,
            p.source_id
                .as_deref()
                .map(|id| format!(" {}", id))
                .unwrap_or_default(),
            p.similarity * 100.0
        ));
    }
    out
}

pub fn render_history(history: &HistoryReply) -> String {
    if history.messages.is_empty() {
        return format!("No messages for session {}", history.session_id);
    }
    history
        .messages
        .iter()
        .map(|m| format!("[{}] {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn check(resp: reqwest::blocking::Response) -> anyhow::Result<reqwest::blocking::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().unwrap_or_default();
    bail!("server returned {}: {}", status, body)
}

fn do_ask(server: &str, message: &str, session: &str, json_output: bool) -> anyhow::Result<()> {
    let url = format!("{}/api/chat", server);
    let resp = client(120)?
        .post(&url)
        .json(&serde_json::json!({ "message": message, "sessionId": session }))
        .send()
        .with_context(|| format!("connection failed to {}", url))?;
    let resp = check(resp)?;

    if json_output {
        let body: serde_json::Value = resp.json()?;
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        let reply: ChatReply = resp.json().context("failed to parse chat response")?;
        println!("{}", render_reply(&reply));
    }
    Ok(())
}

fn do_stream(server: &str, message: &str, session: &str) -> anyhow::Result<()> {
    let url = format!("{}/api/chat/stream", server);
    // No timeout: the body stays open while the answer is generated
    let mut resp = reqwest::blocking::Client::builder()
        .timeout(None)
        .build()?
        .post(&url)
        .json(&serde_json::json!({ "message": message, "sessionId": session }))
        .send()
        .with_context(|| format!("connection failed to {}", url))?;

    if !resp.status().is_success() {
        return check(resp).map(|_| ());
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    io::copy(&mut resp, &mut out)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// History URL with the session id as one percent-encoded path segment.
pub fn history_url(server: &str, session: &str) -> anyhow::Result<reqwest::Url> {
    let mut url =
        reqwest::Url::parse(server).with_context(|| format!("invalid server URL {}", server))?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("server URL cannot take a path: {}", server))?
        .pop_if_empty()
        .extend(["api", "chat", "history", session]);
    Ok(url)
}

fn do_history(server: &str, session: &str, json_output: bool) -> anyhow::Result<()> {
    let url = history_url(server, session)?;
    let resp = client(30)?
        .get(url.clone())
        .send()
        .with_context(|| format!("connection failed to {}", url))?;
    let resp = check(resp)?;

    if json_output {
        let body: serde_json::Value = resp.json()?;
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        let history: HistoryReply = resp.json().context("failed to parse history response")?;
        println!("{}", render_history(&history));
    }
    Ok(())
}

fn do_upload(
    server: &str,
    file: &Path,
    token: Option<&str>,
    multipart: bool,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("cannot read {}", file.display()))?;
    let client = client(300)?;

    let request = if multipart {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "catalogue.json".to_string());
        let part = reqwest::blocking::multipart::Part::bytes(bytes)
            .file_name(name)
            .mime_str("application/json")?;
        client
            .post(format!("{}/api/upload/products/file", server))
            .multipart(reqwest::blocking::multipart::Form::new().part("file", part))
    } else {
        client
            .post(format!("{}/api/upload/products", server))
            .header("content-type", "application/json")
            .body(bytes)
    };

    let request = match token {
        Some(t) => request.bearer_auth(t),
        None => request,
    };

    let resp = check(request.send().context("upload request failed")?)?;
    let report: serde_json::Value = resp.json()?;

    let products = report["products"].as_array().map(Vec::len).unwrap_or(0);
    println!(
        "Uploaded {} product(s), {} embedding(s)",
        products,
        report["embeddings"].as_u64().unwrap_or(0)
    );
    if let Some(list) = report["products"].as_array() {
        for p in list {
            println!(
                "  {}  {}  ({} snippets)",
                p["sku"].as_str().unwrap_or("?"),
                p["name"].as_str().unwrap_or("?"),
                p["embeddings"].as_u64().unwrap_or(0)
            );
        }
    }
    Ok(())
}

/// Show the server status by calling GET /health and GET /health/db.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = client(10)?;

    let url = format!("{}/health", server);
    let body: serde_json::Value = check(
        client
            .get(&url)
            .send()
            .with_context(|| format!("cannot reach {}", url))?,
    )?
    .json()?;
    println!("Glaze server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:      {}", body["version"].as_str().unwrap_or("?"));

    let resp = client.get(format!("{}/health/db", server)).send()?;
    let healthy = resp.status().is_success();
    let db: serde_json::Value = resp.json().unwrap_or_default();
    if healthy {
        println!("PostgreSQL:   {}", db["postgresql"].as_str().unwrap_or("?"));
        println!("pgvector:     {}", db["pgvector"].as_str().unwrap_or("?"));
    } else {
        bail!("database unhealthy: {}", db["error"].as_str().unwrap_or("unknown error"));
    }
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Ask { message, session, json } => do_ask(&server, &message, &session, json),
        Commands::Stream { message, session } => do_stream(&server, &message, &session),
        Commands::History { session, json } => do_history(&server, &session, json),
        Commands::Upload { file, token, multipart } => {
            do_upload(&server, &file, token.as_deref(), multipart)
        }
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("glaze-cli: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(provenance: Vec<Provenance>) -> ChatReply {
        ChatReply {
            answer: "The Sakura set has twelve pieces.\n".to_string(),
            provenance,
            retrieved_docs: 1,
            conversation_id: None,
        }
    }

    #[test]
    fn test_render_reply_without_sources() {
        assert_eq!(render_reply(&reply(Vec::new())), "The Sakura set has twelve pieces.");
    }

    #[test]
    fn test_render_reply_numbers_sources() {
        let rendered = render_reply(&reply(vec![
            Provenance {
                product_id: "p1".to_string(),
                source_type: "faq".to_string(),
                source_id: Some("faq-2".to_string()),
                similarity: 0.834,
            },
            Provenance {
                product_id: "p2".to_string(),
                source_type: "description".to_string(),
                source_id: None,
                similarity: 0.61,
            },
        ]));
        assert!(rendered.contains("\n\nSources:\n  1. product p1 (faq faq-2) 83%"));
        assert!(rendered.ends_with("2. product p2 (description) 61%"));
    }

    #[test]
    fn test_chat_reply_parses_server_shape() {
        let reply: ChatReply = serde_json::from_str(
            r#"{"answer":"Hi","provenance":[{"product_id":"a","source_type":"spec","source_id":"spec","similarity":0.9}],"retrieved_docs":3,"conversationId":"c-1"}"#,
        )
        .unwrap();
        assert_eq!(reply.retrieved_docs, 3);
        assert_eq!(reply.conversation_id.as_deref(), Some("c-1"));
        assert_eq!(reply.provenance[0].source_id.as_deref(), Some("spec"));
    }

    #[test]
    fn test_render_history() {
        let history = HistoryReply {
            session_id: "s-1".to_string(),
            messages: vec![
                HistoryMessage { role: "user".to_string(), content: "Hi".to_string() },
                HistoryMessage { role: "assistant".to_string(), content: "Hello!".to_string() },
            ],
        };
        assert_eq!(render_history(&history), "[user] Hi\n\n[assistant] Hello!");
    }

    #[test]
    fn test_render_empty_history() {
        let history = HistoryReply { session_id: "s-2".to_string(), messages: Vec::new() };
        assert_eq!(render_history(&history), "No messages for session s-2");
    }

    #[test]
    fn test_cli_parses_upload_flags() {
        let cli = Cli::try_parse_from([
            "glaze-cli", "upload", "catalogue.json", "--token", "abc", "--multipart",
        ])
        .unwrap();
        match cli.command {
            Commands::Upload { file, token, multipart } => {
                assert_eq!(file, PathBuf::from("catalogue.json"));
                assert_eq!(token.as_deref(), Some("abc"));
                assert!(multipart);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_history_url_encodes_session() {
        let url = history_url("http://127.0.0.1:3001", "shop/42 ?x#y").unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:3001/api/chat/history/shop%2F42%20%3Fx%23y"
        );

        let trailing = history_url("http://localhost:3001/", "s-1").unwrap();
        assert_eq!(trailing.as_str(), "http://localhost:3001/api/chat/history/s-1");
    }
}

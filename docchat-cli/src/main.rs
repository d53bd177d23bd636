//! docchat-cli: command-line client for a running docchat server
//!
//! # Subcommands
//! - `upload <files..>`: index one or more PDFs
//! - `search <query> [-n <limit>] [--json]`: similarity search
//! - `chat [message]`: one grounded answer, or an interactive session
//! - `status`: show server health

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::blocking::{multipart, Client, Response};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:5000";

/// Uploads embed every document before answering, so allow more time.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "docchat-cli", version, about = "Upload, search and chat over PDF documents")]
struct Cli {
    /// docchat HTTP server URL (overrides DOCCHAT_HTTP_URL env var)
    #[arg(long, env = "DOCCHAT_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Upload PDF documents to the index
    Upload {
        /// PDF files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Search indexed documents
    Search {
        /// Query text to search for
        query: String,

        /// Maximum number of results (server default when omitted)
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Ask a question grounded on the closest document
    Chat {
        /// Message to send; starts an interactive session when omitted
        message: Option<String>,
    },

    /// Show docchat server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HitMetadata {
    #[serde(default)]
    pub text: String,
    pub filename: Option<String>,
    #[serde(default)]
    pub page_count: u32,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub rank: usize,
    pub score: f64,
    pub metadata: Option<HitMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub count: usize,
    pub results: Vec<SearchHit>,
    pub took_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct UploadedDocument {
    pub id: String,
    pub filename: Option<String>,
    pub page_count: u32,
    pub char_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct FailedUpload {
    pub filename: Option<String>,
    pub stage: String,
    pub error: String,
    #[serde(default)]
    pub retryable: bool,
}

#[derive(Debug, Deserialize)]
pub struct UploadReport {
    #[serde(default)]
    pub indexed: Vec<UploadedDocument>,
    #[serde(default)]
    pub failed: Vec<FailedUpload>,
    #[serde(default)]
    pub unconfirmed: usize,
}

#[derive(Debug, Deserialize)]
pub struct ChatReply {
    pub answer: String,
    pub grounded: bool,
    pub matched_id: Option<String>,
    pub score: Option<f64>,
}

// ============================================================================
// Formatting
// ============================================================================

/// First `max` chars of `text` on a single line.
pub fn preview(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let mut cut: String = flat.chars().take(max).collect();
    cut.push('…');
    cut
}

pub fn format_hit(hit: &SearchHit) -> String {
    let (name, detail, text) = match &hit.metadata {
        Some(m) => (
            m.filename.as_deref().unwrap_or("(unnamed)"),
            format!(
                ", {} page(s){}",
                m.page_count,
                if m.truncated { ", excerpt" } else { "" }
            ),
            preview(&m.text, 200),
        ),
        None => ("(no metadata)", String::new(), String::new()),
    };
    format!(
        "{:>3}. {} [{}]\n     Score: {:.0}%{}\n     {}",
        hit.rank,
        name,
        hit.id,
        hit.score * 100.0,
        detail,
        text
    )
}

pub fn format_upload_report(report: &UploadReport) -> String {
    let mut lines = Vec::new();
    for doc in &report.indexed {
        lines.push(format!(
            "indexed  {} [{}] ({} pages, {} chars)",
            doc.filename.as_deref().unwrap_or("(unnamed)"),
            doc.id,
            doc.page_count,
            doc.char_count
        ));
    }
    for doc in &report.failed {
        let hint = if doc.retryable { " (retry later)" } else { "" };
        lines.push(format!(
            "failed   {} at {}: {}{}",
            doc.filename.as_deref().unwrap_or("(unnamed)"),
            doc.stage,
            doc.error,
            hint
        ));
    }
    if report.unconfirmed > 0 {
        lines.push(format!(
            "warning  index confirmed {} fewer document(s) than were sent",
            report.unconfirmed
        ));
    }
    lines.join("\n")
}

pub fn format_reply(reply: &ChatReply) -> String {
    match (&reply.matched_id, reply.score) {
        (Some(id), Some(score)) if reply.grounded => {
            format!("{}\n  (source {}, score {:.2})", reply.answer, id, score)
        }
        _ => reply.answer.clone(),
    }
}

/// Pull the `error` field out of a docchat error body, falling back to the raw text.
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout: Duration) -> anyhow::Result<Client> {
    Ok(Client::builder().timeout(timeout).cookie_store(true).build()?)
}

/// Fail with the server's message on any non-success status.
fn check(resp: Response) -> anyhow::Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    bail!("server returned {}: {}", status, error_message(&body))
}

fn do_upload(server: &str, files: &[PathBuf]) -> anyhow::Result<()> {
    let mut form = multipart::Form::new();
    for path in files {
        form = form
            .file("pdf", path)
            .with_context(|| format!("cannot read {}", path.display()))?;
    }

    let url = format!("{}/", server);
    let resp = client(UPLOAD_TIMEOUT)?
        .post(&url)
        .multipart(form)
        .send()
        .with_context(|| format!("connection failed to {}", url))?;

    // 207 and 422 still carry a per-document report worth printing.
    let status = resp.status();
    let body = resp.text().unwrap_or_default();
    match serde_json::from_str::<UploadReport>(&body) {
        Ok(report) if !report.indexed.is_empty() || !report.failed.is_empty() => {
            println!("{}", format_upload_report(&report));
            if report.indexed.is_empty() {
                bail!("no documents were indexed (HTTP {})", status);
            }
            Ok(())
        }
        _ if status.is_success() => Ok(()),
        _ => bail!("server returned {}: {}", status, error_message(&body)),
    }
}

fn do_search(server: &str, query: &str, limit: Option<usize>, json: bool) -> anyhow::Result<()> {
    let mut form = vec![("query", query.to_string())];
    if let Some(n) = limit {
        form.push(("limit", n.to_string()));
    }

    let url = format!("{}/search", server);
    let resp = client(REQUEST_TIMEOUT)?
        .post(&url)
        .form(&form)
        .send()
        .with_context(|| format!("connection failed to {}", url))?;
    let resp = check(resp)?;

    if json {
        let body: serde_json::Value = resp.json().context("failed to parse search response")?;
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let search: SearchResponse = resp.json().context("failed to parse search response")?;
    if search.results.is_empty() {
        eprintln!("No results found for: {}", search.query);
        return Ok(());
    }
    for hit in &search.results {
        println!("{}\n", format_hit(hit));
    }
    eprintln!(
        "{} result(s) in {} ms",
        search.count,
        search.took_ms.unwrap_or_default()
    );
    Ok(())
}

fn send_chat(client: &Client, server: &str, message: &str) -> anyhow::Result<ChatReply> {
    let url = format!("{}/chat", server);
    let resp = client
        .post(&url)
        .form(&[("message", message)])
        .send()
        .with_context(|| format!("connection failed to {}", url))?;
    check(resp)?.json().context("failed to parse chat response")
}

fn do_chat(server: &str, message: Option<String>) -> anyhow::Result<()> {
    // One client for the whole session so the session cookie is reused.
    let client = client(REQUEST_TIMEOUT)?;

    if let Some(message) = message {
        println!("{}", format_reply(&send_chat(&client, server, &message)?));
        return Ok(());
    }

    eprintln!("Chatting with {} (/reset clears the conversation, /quit exits)", server);
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        eprint!("> ");
        io::stderr().flush().ok();
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                check(client.post(format!("{}/chat/reset", server)).send()?)?;
                eprintln!("Conversation cleared.");
            }
            message => match send_chat(&client, server, message) {
                Ok(reply) => println!("{}\n", format_reply(&reply)),
                Err(e) => eprintln!("docchat-cli: {}", e),
            },
        }
    }
    Ok(())
}

fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    let resp = client(Duration::from_secs(10))?
        .get(&url)
        .send()
        .with_context(|| format!("cannot reach {}", url))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        bail!("server unhealthy (HTTP {}): {}", status, error_message(&body));
    }

    let body: serde_json::Value = resp.json().unwrap_or_default();
    println!("docchat server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:        {}", body["version"].as_str().unwrap_or("?"));
    println!("Index:          {}", body["index"]["backend"].as_str().unwrap_or("?"));
    println!("Vectors:        {}", body["index"]["total_vectors"]);
    println!("Dimension:      {}", body["index"]["dimension"]);
    println!("Embedding:      {}", body["embedding"].as_str().unwrap_or("?"));
    println!("Chat:           {}", body["chat"].as_str().unwrap_or("?"));
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Upload { files } => do_upload(&server, &files),
        Commands::Search { query, limit, json } => do_search(&server, &query, limit, json),
        Commands::Chat { message } => do_chat(&server, message),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("docchat-cli: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

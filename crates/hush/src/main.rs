use std::io::Read;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "hush", about = "hush — share encrypted messages that expire", version)]
struct Cli {
    /// Hush server URL (default: http://localhost:8080 or $HUSH_SERVER)
    #[arg(long, env = "HUSH_SERVER", default_value = "http://localhost:8080")]
    server: String,

    /// Bearer token for admin commands ($HUSH_ADMIN_TOKEN)
    #[arg(long, env = "HUSH_ADMIN_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the hush HTTP server
    Serve {
        /// Port to listen on (default: $HUSH_PORT or 8080)
        #[arg(long, env = "HUSH_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind (default: $HUSH_HOST or 0.0.0.0)
        #[arg(long, env = "HUSH_HOST", default_value = "0.0.0.0")]
        host: String,
    },
    /// Request a fresh encryption key from the server
    Keygen,
    /// Encrypt a message and print its share link
    Send {
        /// Message text, or `-` to read it from stdin
        #[arg(name = "MESSAGE")]
        message: String,
        /// Encryption key (base64); a fresh one is requested when omitted
        #[arg(long)]
        key: Option<String>,
        /// Lifetime e.g. 1h, 36h, 7d (rounded up to whole hours)
        #[arg(long)]
        ttl: Option<String>,
        /// Number of successful decrypts before the message locks
        #[arg(long)]
        views: Option<u32>,
    },
    /// Show a message's status without spending a view
    Peek {
        /// Message id or share link
        id: String,
    },
    /// Decrypt a message, spending one view
    Open {
        /// Message id or share link
        id: String,
        /// Decryption key (base64)
        #[arg(long)]
        key: String,
    },
    /// Print the shareable URL for a message id
    Link {
        /// Message id
        id: String,
    },
    /// Delete all expired and spent messages immediately
    Cleanup,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("HUSH_LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, host } => cmd_serve(host, port).await,

        Commands::Keygen => cmd_keygen(&cli.server).await,

        Commands::Send {
            message,
            key,
            ttl,
            views,
        } => cmd_send(&cli.server, &message, key, ttl.as_deref(), views).await,

        Commands::Peek { id } => cmd_peek(&cli.server, &id).await,

        Commands::Open { id, key } => cmd_open(&cli.server, &id, &key).await,

        Commands::Link { id } => {
            println!("{}/message/{}", cli.server.trim_end_matches('/'), id);
            Ok(())
        }

        Commands::Cleanup => cmd_cleanup(&cli.server, cli.token.as_deref()).await,
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16) -> Result<()> {
    let cfg = hush_server::ServerConfig {
        host,
        port,
        ..Default::default()
    };
    hush_server::run(cfg).await
}

async fn cmd_keygen(server: &str) -> Result<()> {
    let key = request_key(server).await?;
    println!("{key}");
    Ok(())
}

async fn cmd_send(
    server: &str,
    message: &str,
    key: Option<String>,
    ttl: Option<&str>,
    views: Option<u32>,
) -> Result<()> {
    let message = if message == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read message from stdin")?;
        buf
    } else {
        message.to_owned()
    };

    let expiry_hours = ttl.map(parse_hours).transpose()?;

    let key = match key {
        Some(k) => k,
        None => request_key(server).await?,
    };

    let client = Client::new();
    let body = serde_json::json!({
        "message": message,
        "key": key,
        "expiry_hours": expiry_hours,
        "max_views": views,
    });

    let resp = client
        .post(format!("{}/encrypt", server.trim_end_matches('/')))
        .json(&body)
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;
    if !status.is_success() {
        anyhow::bail!("{}", json["error"].as_str().unwrap_or("unknown error"));
    }

    let id = json["message_id"].as_str().unwrap_or("");
    println!("✓ message stored");
    println!("  link: {}/message/{}", server.trim_end_matches('/'), id);
    println!("  key:  {key}");
    println!(
        "  expires in {} — {} view(s)",
        json["expires_in"].as_str().unwrap_or("?"),
        json["max_views"]
    );
    Ok(())
}

async fn cmd_peek(server: &str, id: &str) -> Result<()> {
    let id = extract_id(id);
    let client = Client::new();
    let resp = client
        .get(format!("{}/message/{}", server.trim_end_matches('/'), id))
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;
    if !status.is_success() {
        anyhow::bail!("{}", json["error"].as_str().unwrap_or("unknown error"));
    }

    let views_info = match json["views_left"].as_u64() {
        Some(n) => format!("{n} view(s) left"),
        None => "unlimited views".to_string(),
    };
    let ttl_info = match json["expires_in"].as_i64() {
        Some(secs) if secs > 0 => format!("expires in {}", format_duration(secs as u64)),
        Some(_) => "expired".to_string(),
        None => "no expiry".to_string(),
    };
    println!("  {id} — {ttl_info} — {views_info}");
    Ok(())
}

async fn cmd_open(server: &str, id: &str, key: &str) -> Result<()> {
    let id = extract_id(id);
    let client = Client::new();
    let body = serde_json::json!({
        "message_id": id,
        "key": key,
    });

    let resp = client
        .post(format!("{}/decrypt", server.trim_end_matches('/')))
        .json(&body)
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;
    if !status.is_success() {
        anyhow::bail!("{}", json["error"].as_str().unwrap_or("unknown error"));
    }

    // Plaintext on stdout only; bookkeeping goes to stderr so the output
    // stays pipeable.
    println!("{}", json["decrypted_message"].as_str().unwrap_or(""));
    if let Some(n) = json["views_left"].as_u64() {
        eprintln!("({n} view(s) left)");
    }
    Ok(())
}

async fn cmd_cleanup(server: &str, token: Option<&str>) -> Result<()> {
    let client = Client::new();
    let mut req = client.post(format!("{}/admin/cleanup", server.trim_end_matches('/')));
    if let Some(t) = token {
        req = req.bearer_auth(t);
    }
    let resp = req.send().await.context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.unwrap_or_default();
    if !status.is_success() {
        anyhow::bail!(
            "server returned {status}: {}",
            json["error"].as_str().unwrap_or("")
        );
    }
    let n = json["deleted_count"].as_u64().unwrap_or(0);
    println!("removed {n} dead message(s)");
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

async fn request_key(server: &str) -> Result<String> {
    let client = Client::new();
    let resp = client
        .get(format!("{}/generate_key", server.trim_end_matches('/')))
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;
    if !status.is_success() {
        anyhow::bail!("{}", json["error"].as_str().unwrap_or("unknown error"));
    }
    json["key"]
        .as_str()
        .map(str::to_owned)
        .context("response carried no key")
}

/// Accept either a bare message id or a full share link.
fn extract_id(input: &str) -> &str {
    input
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(input)
}

/// Parse human duration strings like "1h", "36h", "7d" into whole hours,
/// rounding up so short TTLs never collapse to zero.
fn parse_hours(s: &str) -> Result<u32> {
    let d: humantime::Duration = s
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;
    u32::try_from(d.as_secs().div_ceil(3600)).context("ttl too large")
}

fn format_duration(secs: u64) -> String {
    if secs >= 86400 {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_id_handles_links_and_bare_ids() {
        assert_eq!(
            extract_id("http://localhost:8080/message/abc-123"),
            "abc-123"
        );
        assert_eq!(
            extract_id("http://localhost:8080/message/abc-123/"),
            "abc-123"
        );
        assert_eq!(extract_id("abc-123"), "abc-123");
    }

    #[test]
    fn parse_hours_rounds_up() {
        assert_eq!(parse_hours("30m").unwrap(), 1);
        assert_eq!(parse_hours("1h").unwrap(), 1);
        assert_eq!(parse_hours("90m").unwrap(), 2);
        assert_eq!(parse_hours("7d").unwrap(), 168);
        assert!(parse_hours("banana").is_err());
    }
}

//! agentguard - operator CLI for the agent trust boundary
//!
//! ## Commands
//!
//! - `read` / `write` / `delete` / `list` / `search`: sandboxed document access
//! - `backups` / `restore`: inspect and roll back snapshots
//! - `audit verify` / `audit tail`: check and inspect the hash-chained trail
//! - `shield eval` / `shield threats`: evaluate events against the threat policy
//! - `config get` / `config show`: inspect the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::Level;

use agentguard_core::audit::{verify_chain, AuditLog, AuditLogEntry, AuditSink, FileAuditSink};
use agentguard_core::backup::FsBackupStore;
use agentguard_core::shield::{EventScope, ShieldEngine, ShieldEvent};
use agentguard_core::{AppConfig, SandboxManager};

#[derive(Parser)]
#[command(name = "agentguard")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sandbox and Shield for self-modifying agents", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "AGENTGUARD_CONFIG", default_value = "agentguard.toml")]
    config: PathBuf,

    /// User id for rate limiting and audit entries (default: agent.user_id)
    #[arg(long, global = true, env = "AGENTGUARD_USER")]
    user: Option<String>,

    /// Emit JSON output and JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a document from the sandbox
    Read {
        /// Document name, e.g. SOUL.md
        file: String,
    },

    /// Write a document through the full guard pipeline
    Write {
        /// Document name
        file: String,

        /// New content (default: read from --from, else stdin)
        content: Option<String>,

        /// Read new content from this file
        #[arg(long, conflicts_with = "content")]
        from: Option<PathBuf>,
    },

    /// Delete a document (a backup is taken first)
    Delete {
        /// Document name
        file: String,
    },

    /// List existing documents
    List,

    /// Case-insensitive line search across documents
    Search {
        /// Text to look for
        query: String,
    },

    /// List backups of a document, newest first
    Backups {
        /// Document name
        file: String,
    },

    /// Restore a backup through the write pipeline
    Restore {
        /// Document name
        file: String,

        /// Which backup, 0 = newest
        #[arg(short, long, default_value_t = 0)]
        index: usize,
    },

    /// Inspect the audit trail
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },

    /// Evaluate events against the threat policy
    Shield {
        #[command(subcommand)]
        action: ShieldCommand,
    },

    /// Inspect the effective configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum AuditAction {
    /// Verify the hash chain
    Verify,
    /// Show the newest entries
    Tail {
        /// Number of entries
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
}

#[derive(Subcommand)]
enum ShieldCommand {
    /// Evaluate one event
    Eval {
        #[command(flatten)]
        event: EventArgs,
    },
    /// List the loaded threats
    Threats,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print one value by dot key, e.g. sandbox.root
    Get { key: String },
    /// Print the effective configuration as TOML
    Show,
}

#[derive(clap::Args, Debug, Default)]
struct EventArgs {
    /// Event scope: prompt, skill.install, skill.execute, tool.call,
    /// network.egress, secrets.read, mcp
    #[arg(long)]
    scope: String,
    #[arg(long)]
    content: Option<String>,
    #[arg(long)]
    tool: Option<String>,
    #[arg(long)]
    skill: Option<String>,
    #[arg(long)]
    domain: Option<String>,
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    file_path: Option<String>,
    #[arg(long)]
    secret_path: Option<String>,
}

/// Resolved global options shared by every command.
struct Ctx {
    config: AppConfig,
    user: String,
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    agentguard_core::init_tracing(cli.json, level);

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;
    let ctx = Ctx {
        user: cli.user.unwrap_or_else(|| config.agent.user_id.clone()),
        config,
        json: cli.json,
    };

    match cli.command {
        Commands::Read { file } => cmd_read(&ctx, &file).await,
        Commands::Write {
            file,
            content,
            from,
        } => {
            let content = read_content(content, from.as_deref()).await?;
            cmd_write(&ctx, &file, &content).await
        }
        Commands::Delete { file } => cmd_delete(&ctx, &file).await,
        Commands::List => cmd_list(&ctx).await,
        Commands::Search { query } => cmd_search(&ctx, &query).await,
        Commands::Backups { file } => cmd_backups(&ctx, &file).await,
        Commands::Restore { file, index } => cmd_restore(&ctx, &file, index).await,
        Commands::Audit { action } => match action {
            AuditAction::Verify => cmd_audit_verify(&ctx).await,
            AuditAction::Tail { count } => cmd_audit_tail(&ctx, count).await,
        },
        Commands::Shield { action } => match action {
            ShieldCommand::Eval { event } => cmd_shield_eval(&ctx, &event).await,
            ShieldCommand::Threats => cmd_shield_threats(&ctx).await,
        },
        Commands::Config { action } => match action {
            ConfigAction::Get { key } => cmd_config_get(&ctx, &key),
            ConfigAction::Show => cmd_config_show(&ctx),
        },
    }
}

async fn open_sandbox(config: &AppConfig) -> Result<SandboxManager> {
    let sink = FileAuditSink::new(&config.audit.path);
    let audit = AuditLog::open(Arc::new(sink))
        .await
        .with_context(|| format!("Failed to open audit log {}", config.audit.path.display()))?;
    let backups = FsBackupStore::new(&config.backup.dir)
        .with_context(|| format!("Failed to open backup dir {}", config.backup.dir.display()))?;
    SandboxManager::new(config.sandbox_config(), Arc::new(audit), Arc::new(backups))
        .context("Failed to open sandbox")
}

async fn read_content(content: Option<String>, from: Option<&Path>) -> Result<String> {
    if let Some(content) = content {
        return Ok(content);
    }
    if let Some(path) = from {
        return tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()));
    }
    let mut buf = String::new();
    tokio::io::stdin()
        .read_to_string(&mut buf)
        .await
        .context("Failed to read content from stdin")?;
    Ok(buf)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_read(ctx: &Ctx, file: &str) -> Result<()> {
    let sandbox = open_sandbox(&ctx.config).await?;
    let content = sandbox.read(&ctx.user, file).await?;
    if ctx.json {
        print_json(&serde_json::json!({ "file": file, "content": content }))
    } else {
        print!("{content}");
        Ok(())
    }
}

async fn cmd_write(ctx: &Ctx, file: &str, content: &str) -> Result<()> {
    let sandbox = open_sandbox(&ctx.config).await?;
    let outcome = sandbox.write(&ctx.user, file, content).await?;
    if ctx.json {
        return print_json(&outcome);
    }
    println!("Wrote {} ({} bytes)", outcome.file, outcome.bytes);
    println!("  sha256: {}", outcome.content_hash);
    if let Some(backup) = &outcome.backup {
        println!("  backup: {}", backup.backup_path.display());
    }
    for warning in &outcome.warnings {
        println!("  warning: {warning}");
    }
    Ok(())
}

async fn cmd_delete(ctx: &Ctx, file: &str) -> Result<()> {
    let sandbox = open_sandbox(&ctx.config).await?;
    let outcome = sandbox.delete(&ctx.user, file).await?;
    if ctx.json {
        return print_json(&outcome);
    }
    println!("Deleted {}", outcome.file);
    println!("  backup: {}", outcome.backup.backup_path.display());
    Ok(())
}

async fn cmd_list(ctx: &Ctx) -> Result<()> {
    let sandbox = open_sandbox(&ctx.config).await?;
    let files = sandbox.list(&ctx.user).await?;
    if ctx.json {
        return print_json(&files);
    }
    if files.is_empty() {
        println!("No documents.");
    }
    for info in files {
        let modified = info
            .modified
            .map(|m| m.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".into());
        let flag = if info.immutable { " (immutable)" } else { "" };
        println!("{:<14} {:>8}  {}{}", info.file, info.size, modified, flag);
    }
    Ok(())
}

async fn cmd_search(ctx: &Ctx, query: &str) -> Result<()> {
    let sandbox = open_sandbox(&ctx.config).await?;
    let matches = sandbox.search(&ctx.user, query).await?;
    if ctx.json {
        return print_json(&matches);
    }
    for m in &matches {
        println!("{}:{}: {}", m.file, m.line_number, m.line);
    }
    if matches.is_empty() {
        println!("No matches.");
    }
    Ok(())
}

async fn cmd_backups(ctx: &Ctx, file: &str) -> Result<()> {
    let sandbox = open_sandbox(&ctx.config).await?;
    let backups = sandbox.backups(file).await?;
    if ctx.json {
        return print_json(&backups);
    }
    if backups.is_empty() {
        println!("No backups of {file}.");
    }
    for (index, meta) in backups.iter().enumerate() {
        println!(
            "[{index}] {}  {:>8} bytes  {}",
            meta.timestamp.to_rfc3339(),
            meta.size,
            truncate(&meta.content_hash, 12)
        );
    }
    Ok(())
}

async fn cmd_restore(ctx: &Ctx, file: &str, index: usize) -> Result<()> {
    let sandbox = open_sandbox(&ctx.config).await?;
    let outcome = sandbox.restore(&ctx.user, file, index).await?;
    if ctx.json {
        return print_json(&outcome);
    }
    println!("Restored {} from backup [{index}]", outcome.file);
    println!("  sha256: {}", outcome.content_hash);
    Ok(())
}

async fn load_audit(config: &AppConfig) -> Result<Vec<AuditLogEntry>> {
    FileAuditSink::new(&config.audit.path)
        .load()
        .await
        .with_context(|| format!("Failed to read audit log {}", config.audit.path.display()))
}

async fn cmd_audit_verify(ctx: &Ctx) -> Result<()> {
    let entries = load_audit(&ctx.config).await?;
    let report = verify_chain(&entries).context("Audit chain verification failed")?;
    if ctx.json {
        return print_json(&report);
    }
    println!("Audit chain OK: {} entries", report.entries);
    if let Some(head) = &report.head_hash {
        println!("  head: {head}");
    }
    Ok(())
}

async fn cmd_audit_tail(ctx: &Ctx, count: usize) -> Result<()> {
    let entries = load_audit(&ctx.config).await?;
    let start = entries.len().saturating_sub(count);
    let tail = &entries[start..];
    if ctx.json {
        return print_json(&tail);
    }
    for entry in tail {
        println!("{}", render_entry(entry));
    }
    Ok(())
}

fn render_entry(entry: &AuditLogEntry) -> String {
    let status = match (&entry.success, &entry.error_code) {
        (true, _) => "ok".to_string(),
        (false, Some(code)) => code.to_string(),
        (false, None) => "FAILED".to_string(),
    };
    format!(
        "{} {:<10} {:<6} {:<14} {}",
        entry.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        truncate(&entry.user_id, 10),
        entry.operation,
        entry.file,
        status
    )
}

fn build_event(args: &EventArgs) -> Result<ShieldEvent> {
    let scope: EventScope = args
        .scope
        .parse()
        .with_context(|| format!("Invalid --scope `{}`", args.scope))?;
    let mut event = ShieldEvent::new(scope);
    event.content = args.content.clone();
    event.tool_name = args.tool.clone();
    event.skill_name = args.skill.clone();
    event.domain = args.domain.clone();
    event.url = args.url.clone();
    event.file_path = args.file_path.clone();
    event.secret_path = args.secret_path.clone();
    Ok(event)
}

async fn cmd_shield_eval(ctx: &Ctx, args: &EventArgs) -> Result<()> {
    let event = build_event(args)?;
    let engine = ShieldEngine::load(&ctx.config.policy_path()).await;
    let decision = engine.evaluate(&event);
    if ctx.json {
        return print_json(&decision);
    }
    println!("{}", decision.action);
    if let Some(id) = &decision.threat_id {
        println!("  threat: {id}");
    }
    println!("  reason: {}", decision.reason);
    Ok(())
}

async fn cmd_shield_threats(ctx: &Ctx) -> Result<()> {
    let path = ctx.config.policy_path();
    let engine = ShieldEngine::load(&path).await;
    let threats = engine.threats();
    if ctx.json {
        return print_json(&threats);
    }
    if threats.is_empty() {
        println!("No threats loaded from {}.", path.display());
    }
    for t in &threats {
        println!(
            "{:<12} {:<8} {:<5} {:<16} {}={}",
            t.id,
            t.severity,
            t.confidence,
            t.directive.action,
            t.directive.rule.kind,
            t.directive.rule.value
        );
    }
    Ok(())
}

fn cmd_config_get(ctx: &Ctx, key: &str) -> Result<()> {
    let value = ctx.config.get(key)?;
    if ctx.json {
        return print_json(&value);
    }
    match value {
        toml::Value::String(s) => println!("{s}"),
        other => println!("{other}"),
    }
    Ok(())
}

fn cmd_config_show(ctx: &Ctx) -> Result<()> {
    if ctx.json {
        return print_json(&ctx.config);
    }
    print!("{}", ctx.config.to_toml()?);
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        s.chars().take(max_len).collect()
    }
}

//! # Gazette Watch CLI (`gazette`)
//!
//! ## Usage
//!
//! ```bash
//! gazette --config ./config/gazette.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gazette run <terms>...` | Download today's gazette and print matching acts |
//! | `gazette subscribers list\|add\|remove` | Manage subscribers |
//! | `gazette terms list\|add\|remove` | Manage a subscriber's watch terms |
//! | `gazette sweep` | Run every subscriber's terms and log the notifications |
//!
//! Portal credentials come from `INLABS_EMAIL` / `INLABS_PASSWORD`. Logs go
//! to stderr (`RUST_LOG`, default `gazette_watch=info`); results go to stdout.

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use gazette_watch::config::{self, Config};
use gazette_watch::models::{Match, PipelineStats};
use gazette_watch::notify::{self, LogMailer, Message, SweepOutcome};
use gazette_watch::pipeline::Pipeline;
use gazette_watch::store::{Registration, SubscriberStore, Unregistration};
use gazette_watch::summarize::{create_summarizer, summarize_or_passthrough};

/// Official-gazette watcher: download the day's acts and flag the ones that
/// mention your watch terms.
#[derive(Parser)]
#[command(name = "gazette", version)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/gazette.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once with the given watch terms.
    Run {
        /// Watch terms (case-insensitive substrings).
        terms: Vec<String>,

        /// Print matches and statistics as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage the subscriber set.
    Subscribers {
        #[command(subcommand)]
        action: SubscriberAction,
    },

    /// Manage one subscriber's watch terms.
    Terms {
        #[command(subcommand)]
        action: TermAction,
    },

    /// Run every subscriber's terms and hand the results to the log mailer.
    Sweep,
}

#[derive(Subcommand)]
enum SubscriberAction {
    List,
    Add { email: String },
    Remove { email: String },
}

#[derive(Subcommand)]
enum TermAction {
    List { email: String },
    Add { email: String, term: String },
    Remove { email: String, term: String },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gazette_watch=info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Run { terms, json } => run(&cfg, &terms, json).await?,
        Commands::Subscribers { action } => {
            let store = SubscriberStore::from_config(&cfg.storage);
            match action {
                SubscriberAction::List => {
                    let subscribers = store.get_subscribers().await;
                    if subscribers.is_empty() {
                        println!("No subscribers.");
                    }
                    for email in subscribers {
                        println!("{}", email);
                    }
                }
                SubscriberAction::Add { email } => match store.register(&email).await? {
                    Registration::Registered => println!("Registered {}", email.trim()),
                    Registration::AlreadyRegistered => {
                        println!("{} is already registered", email.trim())
                    }
                },
                SubscriberAction::Remove { email } => match store.unregister(&email).await {
                    Unregistration::Removed => println!("Removed {}", email.trim()),
                    Unregistration::NotFound => println!("{} is not registered", email.trim()),
                },
            }
        }
        Commands::Terms { action } => {
            let store = SubscriberStore::from_config(&cfg.storage);
            match action {
                TermAction::List { email } => {
                    let terms = store.get_terms(&email).await;
                    if terms.is_empty() {
                        println!("No terms.");
                    }
                    for term in terms {
                        println!("{}", term);
                    }
                }
                TermAction::Add { email, term } => {
                    if store.add_term(&email, &term).await {
                        println!("Added '{}'", term.trim());
                    } else {
                        println!("'{}' already present", term.trim());
                    }
                }
                TermAction::Remove { email, term } => {
                    if store.remove_term(&email, &term).await {
                        println!("Removed '{}'", term.trim());
                    } else {
                        println!("'{}' not present", term.trim());
                    }
                }
            }
        }
        Commands::Sweep => sweep(&cfg).await?,
    }

    Ok(())
}

async fn run(cfg: &Config, terms: &[String], json: bool) -> Result<()> {
    let credentials = config::credentials_from_env()?;
    let pipeline = Pipeline::from_config(&cfg.portal, credentials);
    let (matches, stats) = pipeline.run(terms).await.context("Pipeline run failed")?;

    let summarizer = create_summarizer(&cfg.summarize)?;
    let matches = summarize_or_passthrough(summarizer.as_ref(), matches).await;

    if json {
        let out = serde_json::json!({ "matches": matches, "stats": stats });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_matches(&matches);
        print_stats(&stats);
    }
    Ok(())
}

async fn sweep(cfg: &Config) -> Result<()> {
    let credentials = config::credentials_from_env()?;
    let pipeline = Pipeline::from_config(&cfg.portal, credentials);
    let store = SubscriberStore::from_config(&cfg.storage);
    let summarizer = create_summarizer(&cfg.summarize)?;
    let mailer = LogMailer::new();

    let date = Local::now().date_naive().format("%d/%m/%Y").to_string();
    let reports = notify::sweep(&store, &pipeline, summarizer.as_ref(), &mailer, |email, matches| {
        render_message(email, &date, matches)
    })
    .await;

    if reports.is_empty() {
        println!("No subscribers.");
    }
    for report in &reports {
        let status = match &report.outcome {
            SweepOutcome::NoTerms => "no terms".to_string(),
            SweepOutcome::Sent { matches } => format!("sent ({} matches)", matches),
            SweepOutcome::SendFailed { matches } => format!("send failed ({} matches)", matches),
            SweepOutcome::Failed { reason } => format!("failed: {}", reason),
        };
        println!("{:<40} {}", report.email, status);
    }
    Ok(())
}

fn print_matches(matches: &[Match]) {
    if matches.is_empty() {
        println!("No matches.");
        return;
    }
    for (i, m) in matches.iter().enumerate() {
        println!(
            "{}. [{}] {} ({})",
            i + 1,
            m.document.section,
            m.document.filename,
            m.document.category
        );
        println!("    terms: {}", m.matched_terms.join(", "));
        for snippet in &m.snippets {
            println!("    > {}", snippet);
        }
        if let Some(summary) = &m.summary {
            println!("    summary: {}", summary);
        }
        println!();
    }
}

fn print_stats(stats: &PipelineStats) {
    println!("--- Stats ---");
    println!("archives:   {}", stats.archives_downloaded);
    println!("xml files:  {}", stats.markup_files_processed);
    println!("documents:  {}", stats.documents_extracted);
    println!("matches:    {}", stats.matches_found);
    println!(
        "time:       download {:.2}s, extract {:.2}s, search {:.2}s",
        stats.download_secs, stats.extract_secs, stats.search_secs
    );
}

/// Plain-text notification body.
fn render_message(email: &str, date: &str, matches: &[Match]) -> Message {
    let mut body = format!("Olá {},\n\n", email);
    if matches.is_empty() {
        body.push_str(&format!(
            "Nenhuma publicação do DOU de {} menciona seus termos.\n",
            date
        ));
    } else {
        body.push_str(&format!(
            "{} publicação(ões) do DOU de {} mencionam seus termos:\n\n",
            matches.len(),
            date
        ));
        for m in matches {
            body.push_str(&format!(
                "- {} ({}, {})\n  Termos: {}\n",
                m.document.filename,
                m.document.section,
                m.document.category,
                m.matched_terms.join(", ")
            ));
            match &m.summary {
                Some(summary) => body.push_str(&format!("  Resumo: {}\n", summary)),
                None => {
                    for snippet in &m.snippets {
                        body.push_str(&format!("  > {}\n", snippet));
                    }
                }
            }
            body.push('\n');
        }
    }
    Message {
        subject: format!("DOU Notificações - {}", date),
        body,
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use chat_capture::api::{HttpPromptApi, PromptApi};
use chat_capture::background::BackgroundService;
use chat_capture::capture::CapturePipeline;
use chat_capture::config::CaptureConfig;
use chat_capture::extractors::extract_conversations;
use chat_capture::messaging::{Message, Response, Transport};
use chat_capture::page::{watch_snapshot, FileSnapshotSource};
use chat_capture::progress;
use chat_capture::scan::{find_snapshots, scan_snapshots, ScanSummary};
use chat_capture::scheduler::{start_periodic_capture, CronCaptureConfig, MutationScheduler, TokioTimer};
use chat_capture::storage::{LocalStore, KEY_AUTH_TOKEN, KEY_AUTO_SAVE_ENABLED};

#[derive(Parser)]
#[command(name = "chat-capture")]
#[command(about = "Capture AI chat conversations from page snapshots", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.chat-capture/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Local storage file (overrides config)
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    /// Prompt API base URL, e.g. http://localhost:5000/api (overrides config)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract conversations from one saved page and print them as JSON
    Extract {
        /// Path to the HTML snapshot
        #[arg(short, long)]
        file: PathBuf,

        /// URL the page was taken from (selects the platform extractor)
        #[arg(short, long)]
        url: String,
    },

    /// Extract conversations from every HTML snapshot under a directory
    Scan {
        /// Directory to scan recursively
        #[arg(short, long)]
        dir: PathBuf,

        /// URL for snapshots that do not declare their own
        #[arg(short, long)]
        url: Option<String>,

        /// Send the results to local history (and the prompt API when logged in)
        #[arg(long)]
        save: bool,
    },

    /// Watch a snapshot file and auto-save new turns whenever it changes
    Watch {
        /// Path to the HTML snapshot
        #[arg(short, long)]
        file: PathBuf,

        /// URL the page was taken from
        #[arg(short, long)]
        url: String,
    },

    /// Capture a snapshot file on a cron schedule
    Schedule {
        /// Path to the HTML snapshot
        #[arg(short, long)]
        file: PathBuf,

        /// URL the page was taken from
        #[arg(short, long)]
        url: String,

        /// Cron expression (default: every minute)
        #[arg(short, long, default_value = "0 * * * * *")]
        cron: String,
    },

    /// Show locally saved conversation history
    History {
        /// Show at most this many entries
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show the remote save status
    Status,

    /// Store the bearer token used for the prompt API
    Login {
        #[arg(short, long)]
        token: String,
    },

    /// Forget the stored bearer token
    Logout,

    /// Turn auto-save on or off
    AutoSave {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

fn load_config(cli: &Cli) -> Result<CaptureConfig> {
    let mut config = CaptureConfig::load(cli.config.as_deref())?;
    if let Some(storage) = &cli.storage {
        config.storage_path = Some(storage.clone());
    }
    if let Some(api_url) = &cli.api_url {
        config.api_base_url = Some(api_url.clone());
    }
    config.validate()?;
    Ok(config)
}

fn open_store(config: &CaptureConfig) -> Result<LocalStore> {
    LocalStore::open(&config.storage_path()?)
}

fn open_sink(config: &CaptureConfig) -> Result<BackgroundService> {
    let store = open_store(config)?;
    let api: Option<Box<dyn PromptApi>> = match &config.api_base_url {
        Some(url) => Some(Box::new(HttpPromptApi::new(url, config.request_timeout_secs)?)),
        None => None,
    };
    Ok(BackgroundService::new(store, api, config.history_limit))
}

/// Start the sink, log its status broadcasts, and build a pipeline for `file`
fn start_pipeline(config: &CaptureConfig, file: PathBuf, url: &str) -> Result<Arc<CapturePipeline>> {
    let sink = open_sink(config)?;
    let auto_save = sink.store().auto_save_enabled()?;
    let mut updates = sink.subscribe();
    let (transport, _sink_task) = sink.spawn();

    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => match update.error {
                    Some(error) => warn!("📣 saveStatus → {} ({})", update.status.as_str(), error),
                    None => info!("📣 saveStatus → {}", update.status.as_str()),
                },
                Err(RecvError::Lagged(skipped)) => warn!("⚠️  Missed {} status updates", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let pipeline = CapturePipeline::new(
        Box::new(FileSnapshotSource::new(file, url)),
        Arc::new(transport),
        config.capture_window,
    );
    pipeline.set_auto_save(auto_save);
    if !auto_save {
        warn!("⏸️  Auto-save is off, new turns will not be saved");
    }
    info!("🆔 Capture session {}", pipeline.session_id());
    Ok(Arc::new(pipeline))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Extract { file, url } => {
            info!("🔍 Extracting conversations from {:?}", file);
            let html = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            let records = extract_conversations(&html, &url).unwrap_or_default();
            if records.is_empty() {
                info!("🤷 No conversation found on this page");
            }
            println!("{}", serde_json::to_string_pretty(&records)?);
        }

        Commands::Scan { dir, url, save } => {
            info!("📂 Scanning {:?} for saved chat pages", dir);
            let paths = find_snapshots(&dir);
            let pb = progress::create_scan_progress_bar(paths.len() as u64, "Extracting");
            let results = scan_snapshots(&paths, url.as_deref(), Some(&pb));
            let summary = ScanSummary::from_results(&results);
            progress::finish_with_success(
                &pb,
                &format!("{} files, {} with conversations", summary.files, summary.with_conversation),
            );

            for result in &results {
                if let Some(records) = &result.records {
                    println!("{} ({}): {} turns", result.path.display(), result.url, records.len());
                }
            }
            info!("📊 Found {} turns in {} files", summary.records, summary.with_conversation);

            if save {
                let conversations: Vec<_> = results.into_iter().filter_map(|r| r.records).flatten().collect();
                let (transport, _sink_task) = open_sink(&config)?.spawn();
                let spinner = progress::create_spinner("Saving conversations...");
                match transport.send(Message::SaveConversations { conversations }).await? {
                    response if response.is_success() => progress::finish_with_success(&spinner, "Saved"),
                    response => progress::finish_with_error(&spinner, &format!("Save failed: {:?}", response)),
                }
            }
        }

        Commands::Watch { file, url } => {
            info!("👀 Watching {:?} as {}", file, url);
            let pipeline = start_pipeline(&config, file.clone(), &url)?;
            let scheduler = MutationScheduler::new(
                pipeline,
                Arc::new(TokioTimer::new()),
                config.debounce(),
                config.initial_delay(),
            );
            scheduler.start();

            let watcher = tokio::spawn(watch_snapshot(file, scheduler.clone(), config.poll_interval()));
            info!("🔄 Running. Press Ctrl+C to stop.");
            tokio::signal::ctrl_c().await?;
            watcher.abort();
            info!("🛑 Stopped watching");
        }

        Commands::Schedule { file, url, cron } => {
            info!("⏰ Starting scheduled capture with cron: {}", cron);
            let pipeline = start_pipeline(&config, file, &url)?;
            start_periodic_capture(CronCaptureConfig::new(cron), pipeline).await?;
        }

        Commands::History { limit } => {
            let (transport, _sink_task) = open_sink(&config)?.spawn();
            match transport.send(Message::GetConversationHistory).await? {
                Response::History(response) => {
                    let shown = limit.unwrap_or(response.history.len());
                    println!("{}", serde_json::to_string_pretty(&response.history.iter().take(shown).collect::<Vec<_>>())?);
                    info!("📚 {} of {} saved conversations shown", shown.min(response.history.len()), response.history.len());
                }
                other => anyhow::bail!("Unexpected response: {:?}", other),
            }
        }

        Commands::Status => {
            let (transport, _sink_task) = open_sink(&config)?.spawn();
            match transport.send(Message::GetSaveStatus).await? {
                Response::Status(status) => {
                    println!("{}", serde_json::to_string_pretty(&status)?);
                }
                other => anyhow::bail!("Unexpected response: {:?}", other),
            }
        }

        Commands::Login { token } => {
            open_store(&config)?.set(KEY_AUTH_TOKEN, &token)?;
            info!("🔑 Token stored");
        }

        Commands::Logout => {
            open_store(&config)?.remove(KEY_AUTH_TOKEN)?;
            info!("🔒 Token removed");
        }

        Commands::AutoSave { enabled } => {
            open_store(&config)?.set(KEY_AUTO_SAVE_ENABLED, &enabled)?;
            info!("💾 Auto-save {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    Ok(())
}

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use soundfleet_uploader::config::{self, Config};
use soundfleet_uploader::database::{HistoryStore, NewUpload, UploadStatus};
use soundfleet_uploader::models::{TrackType, TrackUpdate};
use soundfleet_uploader::pagination::{page_count, TrackFilters};
use soundfleet_uploader::security::InputValidator;
use soundfleet_uploader::session::{self, SessionStore};
use soundfleet_uploader::{QueueEvent, QueueOutcome, SoundfleetClient, UploadController};

#[derive(Parser)]
#[command(name = "soundfleet-uploader", version, about = "Upload audio tracks to Soundfleet")]
struct Cli {
    /// Backend base URL (overrides the config file for this run)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and store the session
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long, env = "SOUNDFLEET_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the logged-in user
    Whoami,
    /// Queue audio files and upload them one at a time
    Upload {
        #[arg(required = true)]
        files: Vec<String>,
        #[arg(long)]
        track_type: Option<TrackType>,
        #[arg(long)]
        artist: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        genre: Option<String>,
    },
    /// Browse, edit or delete uploaded tracks
    Tracks {
        #[command(subcommand)]
        action: TracksCommand,
    },
    /// Show recent local upload history
    History {
        #[arg(long, default_value_t = 20)]
        limit: u32,
        /// Delete history entries older than this many days first
        #[arg(long)]
        cleanup_days: Option<u32>,
    },
    /// Inspect or change the configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum TracksCommand {
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        track_type: Option<TrackType>,
        #[arg(long)]
        page: Option<u64>,
    },
    /// Change the metadata of an uploaded track
    Edit {
        id: i64,
        #[arg(long)]
        artist: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        genre: Option<String>,
        #[arg(long)]
        track_type: Option<TrackType>,
    },
    Delete {
        id: i64,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    Show,
    Reset,
    SetApiUrl { url: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Migrate configuration if needed
    let migrated = config::migrate_config();
    let loaded = config::load_config();

    let log_level = loaded
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::info!("Starting Soundfleet Uploader v{}", env!("CARGO_PKG_VERSION"));
    if let Err(e) = migrated {
        log::error!("Failed to migrate configuration: {}", e);
    }

    let mut app_config = match loaded {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load configuration: {}", e);
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    config::apply_env_overrides(&mut app_config);
    if let Some(api_url) = cli.api_url.as_deref() {
        app_config.api_url = api_url.trim().to_string();
    }

    match run(cli.command, app_config).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: Config) -> anyhow::Result<ExitCode> {
    let store = SessionStore::default_location()?;

    match command {
        Command::Login { username, password } => {
            let password = match password {
                Some(password) => password,
                None => prompt("Password: ")?,
            };
            let client = build_client(&config)?;
            let session = session::login(&client, &store, &username, &password)
                .await
                .context("Login failed")?;
            println!("Logged in as {}", session.username().unwrap_or(&username));
        }
        Command::Logout => {
            if session::logout(&store)? {
                println!("Logged out.");
            } else {
                println!("Not logged in.");
            }
        }
        Command::Whoami => {
            let client = build_client(&config)?;
            let session = session::require_session(&client, &store).await?;
            println!("{}", session.username().unwrap_or("(unknown user)"));
        }
        Command::Upload {
            files,
            track_type,
            artist,
            title,
            genre,
        } => {
            let metadata = UploadMetadata {
                track_type: track_type.unwrap_or(config.default_track_type),
                artist,
                title,
                genre,
            };
            return upload_files(&config, &store, &files, metadata).await;
        }
        Command::Tracks { action } => {
            if let TracksCommand::Edit {
                artist,
                title,
                genre,
                track_type,
                ..
            } = &action
            {
                for (field, value) in [("artist", artist), ("title", title), ("genre", genre)] {
                    if let Some(value) = value {
                        InputValidator::validate_metadata_field(field, value)?;
                    }
                }
                if artist.is_none() && title.is_none() && genre.is_none() && track_type.is_none() {
                    bail!("Nothing to change: pass --artist, --title, --genre or --track-type");
                }
            }

            let client = authenticated_client(&config, &store).await?;
            match action {
                TracksCommand::List {
                    search,
                    track_type,
                    page,
                } => {
                    let filters = TrackFilters {
                        search,
                        track_type,
                        page,
                    };
                    list_tracks(&client, &filters, config.page_size).await?;
                }
                TracksCommand::Edit {
                    id,
                    artist,
                    title,
                    genre,
                    track_type,
                } => {
                    let update = TrackUpdate {
                        artist: artist.map(|v| v.trim().to_string()),
                        title: title.map(|v| v.trim().to_string()),
                        genre: genre.map(|v| v.trim().to_string()),
                        track_type,
                    };
                    let track = client.update_audio_track(id, &update).await?;
                    println!("Audio track updated successfully.");
                    println!("#{} {} {}", track.id, track.track_type, track.display_name());
                }
                TracksCommand::Delete { id } => {
                    client.delete_audio_track(id).await?;
                    println!("Track #{} deleted.", id);
                }
            }
        }
        Command::History {
            limit,
            cleanup_days,
        } => {
            let history = HistoryStore::open_default().await?;
            if let Some(days) = cleanup_days {
                let removed = history.cleanup_old_history(days).await?;
                println!("Removed {} old entries.", removed);
            }
            for record in history.recent_uploads(limit).await? {
                let detail = match (&record.status, &record.error_message, record.track_id) {
                    (UploadStatus::Success, _, Some(id)) => format!("track #{}", id),
                    (_, Some(error), _) => error.clone(),
                    _ => String::new(),
                };
                println!(
                    "{}  {:<9} {:<5} {} {}",
                    record.uploaded_at.format("%Y-%m-%d %H:%M:%S"),
                    record.status.as_str(),
                    record.track_type,
                    record.file_name,
                    detail
                );
            }
        }
        Command::Config { action } => match action {
            ConfigCommand::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
                println!("# {}", config::get_config_path()?.display());
            }
            ConfigCommand::Reset => {
                config::reset_config()?;
                println!("Configuration reset to defaults.");
            }
            ConfigCommand::SetApiUrl { url } => {
                let mut stored = config::load_config_at(&config::get_config_path()?)?;
                stored.api_url = url.trim().to_string();
                config::save_config(&stored)?;
                println!("API URL set to {}", stored.api_url);
            }
        },
    }

    Ok(ExitCode::SUCCESS)
}

fn build_client(config: &Config) -> anyhow::Result<SoundfleetClient> {
    Ok(SoundfleetClient::new(
        &config.api_url,
        Duration::from_secs(config.request_timeout_secs),
    )?)
}

async fn authenticated_client(
    config: &Config,
    store: &SessionStore,
) -> anyhow::Result<SoundfleetClient> {
    let client = build_client(config)?;
    let session = session::require_session(&client, store).await?;
    Ok(client.with_token(session.access))
}

fn prompt(label: &str) -> anyhow::Result<String> {
    eprint!("{}", label);
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn list_tracks(
    client: &SoundfleetClient,
    filters: &TrackFilters,
    page_size: u32,
) -> anyhow::Result<()> {
    let page = client.list_audio_tracks(filters).await?;

    if page.results.is_empty() {
        println!("No tracks found.");
        return Ok(());
    }

    for track in &page.results {
        println!(
            "#{:<6} {:<5} {:<40} {:>8.2} MB {:>7.1}s",
            track.id,
            track.track_type,
            track.display_name(),
            track.size_mb(),
            track.length
        );
    }
    println!(
        "Page {} of {} ({} tracks)",
        filters.current_page(),
        page_count(page.count, page_size).max(1),
        page.count
    );
    Ok(())
}

struct UploadMetadata {
    track_type: TrackType,
    artist: Option<String>,
    title: Option<String>,
    genre: Option<String>,
}

async fn upload_files(
    config: &Config,
    store: &SessionStore,
    paths: &[String],
    metadata: UploadMetadata,
) -> anyhow::Result<ExitCode> {
    for (field, value) in [
        ("artist", &metadata.artist),
        ("title", &metadata.title),
        ("genre", &metadata.genre),
    ] {
        if let Some(value) = value {
            InputValidator::validate_metadata_field(field, value)?;
        }
    }

    let client = authenticated_client(config, store).await?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let controller = Arc::new(UploadController::with_events(client, tx));

    for (_, error) in controller.enqueue_paths(paths, config.max_file_size_bytes()) {
        println!("{}", error);
    }

    for file in controller.files() {
        controller.edit(&file.filename, |queued| {
            queued.track_type = metadata.track_type;
            if let Some(artist) = &metadata.artist {
                queued.artist = artist.trim().to_string();
            }
            if let Some(title) = &metadata.title {
                queued.title = title.trim().to_string();
            }
            if let Some(genre) = &metadata.genre {
                queued.genre = genre.trim().to_string();
            }
        });
    }

    let queued = controller.files();
    if queued.is_empty() {
        bail!("No valid audio files to upload");
    }

    let history = if config.keep_history {
        match HistoryStore::open_default().await {
            Ok(history) => Some(history),
            Err(e) => {
                log::warn!("Upload history unavailable (non-critical): {}", e);
                None
            }
        }
    } else {
        None
    };

    let cancel_controller = controller.clone();
    ctrlc::set_handler(move || {
        if !cancel_controller.cancel() {
            std::process::exit(130);
        }
    })
    .context("Failed to install Ctrl-C handler")?;

    let mut reporter = EventReporter::new(history, &queued);
    let Some(mut worker) = controller.start() else {
        bail!("Upload queue is already running");
    };

    let outcome = loop {
        tokio::select! {
            Some(event) = rx.recv() => reporter.handle(event).await,
            result = &mut worker => break result.context("Upload worker stopped unexpectedly")?,
        }
    };
    while let Ok(event) = rx.try_recv() {
        reporter.handle(event).await;
    }
    reporter.finish(&outcome).await;

    let remaining = controller.files().len();
    match outcome {
        QueueOutcome::Completed { uploaded } => {
            log::info!("All {} file(s) uploaded", uploaded);
            Ok(ExitCode::SUCCESS)
        }
        QueueOutcome::Failed { uploaded, .. } => {
            println!(
                "{} file(s) uploaded, {} left in the queue.",
                uploaded, remaining
            );
            Ok(ExitCode::FAILURE)
        }
        QueueOutcome::Cancelled { uploaded, .. } => {
            log::info!(
                "Upload cancelled after {} file(s); {} left in the queue",
                uploaded,
                remaining
            );
            Ok(ExitCode::from(130))
        }
    }
}

/// Prints queue events and records finished attempts in the history
struct EventReporter {
    history: Option<HistoryStore>,
    run_id: Option<String>,
    files: HashMap<String, (String, u64)>,
}

impl EventReporter {
    fn new(history: Option<HistoryStore>, queued: &[soundfleet_uploader::QueuedFile]) -> Self {
        let files = queued
            .iter()
            .map(|f| (f.filename.clone(), (f.track_type.to_string(), f.size)))
            .collect();
        Self {
            history,
            run_id: None,
            files,
        }
    }

    async fn handle(&mut self, event: QueueEvent) {
        match event {
            QueueEvent::QueueStarted { run_id, pending } => {
                if let Some(history) = &self.history {
                    if let Err(e) = history.start_run(&run_id, pending).await {
                        log::warn!("Failed to record upload run (non-critical): {}", e);
                    }
                }
                self.run_id = Some(run_id);
            }
            QueueEvent::UploadStarted { filename, size } => {
                eprintln!(
                    "Uploading {} ({:.2} MB)",
                    filename,
                    size as f64 / (1024.0 * 1024.0)
                );
            }
            QueueEvent::UploadProgress { filename, progress } => {
                eprint!("\r{} {:>3}%", filename, progress);
                let _ = std::io::stderr().flush();
            }
            QueueEvent::UploadSucceeded {
                filename, track, ..
            } => {
                eprintln!();
                println!("File {} uploaded successfully.", filename);
                self.record(&filename, UploadStatus::Success, None, Some(track.id))
                    .await;
            }
            QueueEvent::UploadFailed { filename, error, .. } => {
                eprintln!();
                println!("{}", error);
                self.record(&filename, UploadStatus::Failed, Some(&error), None)
                    .await;
            }
            QueueEvent::QueueCancelled { filename } => {
                eprintln!();
                log::info!("Upload of {} cancelled", filename);
                self.record(&filename, UploadStatus::Cancelled, None, None)
                    .await;
            }
            QueueEvent::QueueFinished { uploaded } => {
                log::debug!("Queue finished with {} upload(s)", uploaded);
            }
            QueueEvent::FilesQueued { .. } | QueueEvent::FileRemoved { .. } => {}
        }
    }

    async fn record(
        &self,
        filename: &str,
        status: UploadStatus,
        error_message: Option<&str>,
        track_id: Option<i64>,
    ) {
        let (Some(history), Some(run_id)) = (&self.history, &self.run_id) else {
            return;
        };
        let (track_type, file_size) = self
            .files
            .get(filename)
            .cloned()
            .unwrap_or_else(|| (TrackType::default().to_string(), 0));

        let result = history
            .record_upload(NewUpload {
                run_id,
                file_name: filename,
                track_type: &track_type,
                file_size,
                status,
                error_message,
                track_id,
            })
            .await;
        if let Err(e) = result {
            log::warn!("Failed to record upload history (non-critical): {}", e);
        }
    }

    async fn finish(&self, outcome: &QueueOutcome) {
        let (Some(history), Some(run_id)) = (&self.history, &self.run_id) else {
            return;
        };
        let status = match outcome {
            QueueOutcome::Completed { .. } => "completed",
            QueueOutcome::Failed { .. } => "failed",
            QueueOutcome::Cancelled { .. } => "cancelled",
        };
        if let Err(e) = history.finish_run(run_id, status).await {
            log::warn!("Failed to close upload run (non-critical): {}", e);
        }
    }
}

//! Tandem - Batch Document Translation Service
//!
//! Entry point for the `tandem` binary. Every subcommand opens the same data
//! directory, so a `start` in one process and a `worker` in another share the
//! queue and the job table.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tandem::annotate::{self, Dictionary};
use tandem::app::App;
use tandem::batch::{
    BatchProgress, BatchRequest, DispatchMode, ProgressEvent, LLM_PREFIX, NMT_PREFIX,
};
use tandem::cli::{AppCommand, Args, Commands};
use tandem::config::Config;
use tandem::ratings::{NewRating, Preference};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    match args.command {
        Commands::InitConfig { path } => {
            Config::default().save_to_file(&path)?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
        Commands::App(command) => run(command, args.verbose, args.config.as_deref()).await,
    }
}

async fn run(command: AppCommand, verbose: bool, config_path: Option<&Path>) -> Result<()> {
    // Load configuration
    let mut config = match config_path {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            // Try to load config.toml from current directory first
            if Path::new("config.toml").exists() {
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };
    config.apply_env_overrides()?;
    config.validate()?;

    // Setup logging to both console and file
    setup_logging(verbose, &config.log_dir())?;
    info!("Starting Tandem - Batch Document Translation Service");

    let app = App::new(config)?;
    let service = app.service();

    match command {
        AppCommand::Worker => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                wait_for_shutdown_signal().await;
                info!("Shutdown requested, finishing current message...");
                let _ = shutdown_tx.send(true);
            });

            let stats = app.worker().run(shutdown_rx).await;
            println!("\nWorker stopped:");
            println!("{:<18} {}", "Received", stats.received);
            println!("{:<18} {}", "Completed", stats.completed);
            println!("{:<18} {}", "Accepted partial", stats.accepted_partial);
            println!("{:<18} {}", "Discarded", stats.discarded);
            println!("{:<18} {}", "Retried", stats.retried);
            println!("{:<18} {}", "Gave up", stats.gave_up);
        }

        AppCommand::Start {
            source,
            target,
            target_lang,
            source_lang,
            prefix,
            dictionary,
            dictionary_file,
            sync,
        } => {
            let dictionary = build_dictionary(&dictionary, dictionary_file.as_deref())?;
            let request = BatchRequest {
                source_container: source,
                target_container: target,
                target_language: target_lang,
                source_language: source_lang,
                prefix,
                dictionary,
            };

            let summary = if sync {
                let progress = BarProgress::new();
                service
                    .start_batch_job_with(request, DispatchMode::Inline, &progress)
                    .await?
            } else {
                service.start_batch_job(request).await?
            };

            println!("\nBatch job started:");
            println!("{:<12} {}", "Job ID", summary.job_id);
            println!("{:<12} {}", "Status", summary.status.as_str());
            println!("{:<12} {}", "Files", summary.total_files);
            if summary.status.is_terminal() {
                println!("{:<12} {}", "Processed", summary.processed_files);
                println!("{:<12} {}", "Failed", summary.failed_files);
            }
            if let Some(message) = &summary.message {
                println!("{:<12} {}", "Message", message);
            }
        }

        AppCommand::Status { job_id } => match service.get_job_status(&job_id).await? {
            Some(job) => {
                println!("{:<12} {}", "Job ID", job.job_id);
                println!("{:<12} {}", "Status", job.status.as_str());
                println!(
                    "{:<12} {}/{} processed, {} failed",
                    "Progress", job.processed_files, job.total_files, job.failed_files
                );
                println!("{:<12} {} -> {}", "Containers", job.source_container, job.target_container);
                println!(
                    "{:<12} {} -> {}",
                    "Languages",
                    job.source_language.as_deref().unwrap_or("auto"),
                    job.target_language
                );
                println!("{:<12} {}", "Created", job.created_at.to_rfc3339());
                if let Some(completed_at) = job.completed_at {
                    println!("{:<12} {}", "Completed", completed_at.to_rfc3339());
                }
                if let Some(error) = &job.error {
                    println!("{:<12} {}", "Error", error);
                }
            }
            None => anyhow::bail!("Job not found: {}", job_id),
        },

        AppCommand::Jobs { limit } => {
            let jobs = service.list_jobs(limit).await?;
            println!("\n{:<38} {:<12} {:<10} {:<22} {:<8}", "Job ID", "Status", "Progress", "Created", "Lang");
            println!("{}", "-".repeat(94));
            for job in &jobs {
                println!(
                    "{:<38} {:<12} {:<10} {:<22} {:<8}",
                    job.job_id,
                    job.status.as_str(),
                    format!("{}/{}", job.settled_files(), job.total_files),
                    job.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    job.target_language
                );
            }
            println!("\n{} job(s)", jobs.len());
        }

        AppCommand::DeleteJob { job_id } => {
            if service.delete_job(&job_id).await? {
                println!("Deleted job {}", job_id);
            } else {
                anyhow::bail!("Job not found: {}", job_id);
            }
        }

        AppCommand::Cleanup { hours } => {
            let hours = hours.unwrap_or(app.config().jobs.cleanup_max_age_hours);
            // Clamped to a range chrono::Duration accepts
            let age = chrono::Duration::hours(i64::try_from(hours.min(1_000_000)).unwrap_or(1_000_000));
            let removed = service.cleanup_jobs(age).await?;
            println!("Removed {} finished job(s) older than {} hour(s)", removed, hours);
        }

        AppCommand::Containers => {
            let containers = service.list_containers().await?;
            println!("\nContainers:");
            println!("{}", "-".repeat(40));
            for container in &containers {
                println!("{}", container);
            }
        }

        AppCommand::Files { container } => {
            let files = service.list_container_files(&container).await?;
            println!("\n{:<48} {:>10} {:<22}", "Name", "Size", "Last modified");
            println!("{}", "-".repeat(82));
            for file in &files {
                println!(
                    "{:<48} {:>10} {:<22}",
                    file.name,
                    file.size,
                    file.last_modified
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_default()
                );
            }
            println!("\n{} file(s)", files.len());
        }

        AppCommand::Translations { container } => {
            let translated = service.list_translated_files(&container).await?;
            println!("\n{:<48} {:>10} {:<22}", "Filename", "Size", "Last modified");
            println!("{}", "-".repeat(82));
            for file in &translated.files {
                println!(
                    "{:<48} {:>10} {:<22}",
                    file.filename,
                    file.size,
                    file.last_modified
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_default()
                );
            }
            println!(
                "\n{} matched (nmt: {}, llm: {})",
                translated.matched, translated.total_nmt, translated.total_llm
            );
        }

        AppCommand::Show { container, filename } => {
            let translations = service.get_file_translations(&container, &filename).await?;
            println!("=== NMT: {} ===", translations.filename);
            println!("{}", translations.nmt_content);
            println!("\n=== LLM: {} ===", translations.filename);
            println!("{}", translations.llm_content);
        }

        AppCommand::Evaluate { source, target } => {
            let data = service.evaluation_data(&source, &target).await?;
            println!("{}", serde_json::to_string_pretty(&data)?);
        }

        AppCommand::QueueLength => {
            println!("{}", service.queue_length().await?);
        }

        AppCommand::Rate {
            container,
            filename,
            preferred,
            comments,
        } => {
            let rating = service
                .submit_rating(NewRating {
                    nmt_blob: format!("{}{}", NMT_PREFIX, filename),
                    llm_blob: format!("{}{}", LLM_PREFIX, filename),
                    filename,
                    container,
                    preferred: preferred.parse::<Preference>()?,
                    comments,
                })
                .await?;
            println!("Rating submitted: {}", rating.rating_id);
        }

        AppCommand::Ratings => {
            let list = service.list_ratings().await?;
            println!("\n{:<38} {:<32} {:<6} {:<22}", "Rating ID", "File", "Pref", "Created");
            println!("{}", "-".repeat(100));
            for rating in &list.ratings {
                println!(
                    "{:<38} {:<32} {:<6} {:<22}",
                    rating.rating_id,
                    format!("{}/{}", rating.container, rating.filename),
                    rating.preferred.as_str(),
                    rating.created_at.format("%Y-%m-%d %H:%M:%S").to_string()
                );
                if let Some(comments) = &rating.comments {
                    println!("    {}", comments);
                }
            }
            println!("\n{} rating(s)", list.total);
        }

        AppCommand::RatingStats => {
            let stats = service.rating_stats().await?;
            println!("{:<14} {}", "Total", stats.total_ratings);
            println!(
                "{:<14} {} ({:.1}%)",
                "NMT preferred", stats.nmt_preferred, stats.nmt_percentage
            );
            println!(
                "{:<14} {} ({:.1}%)",
                "LLM preferred", stats.llm_preferred, stats.llm_percentage
            );
        }
    }

    Ok(())
}

fn build_dictionary(entries: &[String], file: Option<&Path>) -> Result<Option<Dictionary>> {
    let mut dictionary = match file {
        Some(path) => annotate::load_dictionary_file(path)?,
        None => Dictionary::new(),
    };
    // Entries on the command line win over the file
    for entry in entries {
        let (term, translation) = annotate::parse_entry(entry)?;
        dictionary.insert(term, translation);
    }
    Ok(if dictionary.is_empty() { None } else { Some(dictionary) })
}

/// Progress bar for `start --sync`
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self { bar }
    }
}

impl BatchProgress for BarProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { total } => self.bar.set_length(total as u64),
            ProgressEvent::FileFinished { blob, succeeded } => {
                if !succeeded {
                    self.bar.println(format!("failed: {}", blob));
                }
                self.bar.set_message(blob);
                self.bar.inc(1);
            }
            ProgressEvent::Finished => self.bar.finish_with_message("done"),
        }
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
    }
}

fn setup_logging(verbose: bool, log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(log_dir, "tandem.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("tandem.log").display()
    );

    Ok(())
}

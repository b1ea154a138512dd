use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use femtocron::bus::MessageBus;
use femtocron::config::AppConfig;
use femtocron::cron::{CronEvent, CronJob, CronService, JobPatch, NewJob, ScheduleKind};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "femtocron", version, about = "femtocron scheduler CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and deliver due prompts
    Run,
    Cron {
        /// Job management; changes reach a running scheduler on its next start
        #[command(subcommand)]
        command: CronCommands,
    },
}

#[derive(Subcommand)]
enum CronCommands {
    Add {
        /// "0 */5 * * * *", "5m", "+10m" or "2026-02-13T15:00:00Z"
        schedule: String,
        /// Prompt delivered when the job fires
        message: String,
        /// cron, interval or once; inferred from the schedule when omitted
        #[arg(long)]
        kind: Option<ScheduleKind>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    List,
    Show {
        #[arg(long)]
        id: String,
    },
    Status,
    Remove {
        #[arg(long)]
        id: String,
    },
    Enable {
        #[arg(long)]
        id: String,
    },
    Disable {
        #[arg(long)]
        id: String,
    },
    Update {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        schedule: Option<String>,
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Remove all disabled jobs
    Cleanup,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run().await,
        Commands::Cron { command } => handle_cron(command).await,
    }
}

async fn run() -> Result<()> {
    let cfg = AppConfig::load()?;
    let bus = MessageBus::new(cfg.inbox_capacity);
    let service = CronService::new(&cfg, Arc::new(bus.clone()));

    let mut events = service.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(CronEvent::Error { job_id, message }) => warn!(job_id = %job_id, "{}", message),
                Ok(event) => info!(job_id = %event.job_id(), "cron event: {:?}", event),
                Err(RecvError::Lagged(n)) => warn!("Cron event observer skipped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let inbox = bus.clone();
    tokio::spawn(async move {
        while let Some(msg) = inbox.consume_inbound().await {
            println!(
                "{}:{} [{}] {}: {}",
                msg.channel, msg.sender_id, msg.job_id, msg.job_name, msg.content
            );
        }
    });

    service.start().await;
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    service.stop().await;

    if cfg.cleanup_on_exit {
        service.cleanup().await?;
    }
    Ok(())
}

async fn handle_cron(cmd: CronCommands) -> Result<()> {
    let cfg = AppConfig::load()?;
    // Store-only operations; nothing is armed in this process.
    let service = CronService::new(&cfg, Arc::new(MessageBus::new(1)));

    match cmd {
        CronCommands::Add {
            schedule,
            message,
            kind,
            name,
            description,
        } => {
            let job = service
                .create(NewJob {
                    schedule,
                    kind,
                    payload: message,
                    name,
                    description,
                })
                .await?;
            println!("Added job {} ({}).", job.name, job.id);
        }
        CronCommands::List => {
            let jobs = service.list().await;
            if jobs.is_empty() {
                println!("No cron jobs found.");
            } else {
                println!(
                    "{:<36} {:<20} {:<26} {:<10} {:<8} {:<6}",
                    "ID", "Name", "Schedule", "Status", "Last", "Runs"
                );
                println!("{:-<110}", "");
                for job in jobs {
                    println!(
                        "{:<36} {:<20} {:<26} {:<10} {:<8} {:<6}",
                        job.id,
                        job.name,
                        schedule_label(&job),
                        if job.enabled { "Enabled" } else { "Disabled" },
                        job.last_status
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        job.run_count
                    );
                }
            }
        }
        CronCommands::Show { id } => {
            let job = service.get(&id).await?;
            println!("ID:          {}", job.id);
            println!("Name:        {}", job.name);
            println!("Schedule:    {}", schedule_label(&job));
            println!("Enabled:     {}", job.enabled);
            println!("Payload:     {}", job.payload);
            if let Some(description) = &job.description {
                println!("Description: {}", description);
            }
            println!("Created:     {}", job.created_at.to_rfc3339());
            println!("Last run:    {}", fmt_time(job.last_run_at));
            println!(
                "Last status: {}",
                job.last_status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "N/A".to_string())
            );
            if let Some(err) = &job.last_error {
                println!("Last error:  {}", err);
            }
            println!("Runs:        {}", job.run_count);
            println!("Next run:    {}", fmt_time(job.next_run_at));
        }
        CronCommands::Status => {
            let status = service.status().await;
            println!("Jobs: {}", status.jobs);
            println!("Enabled jobs: {}", status.enabled_jobs);
            match status.armed_jobs {
                Some(armed) => println!("Armed timers: {}", armed),
                None => println!("Scheduler: not running in this process"),
            }
            println!("Next wake: {}", fmt_time(status.next_wake_at));
        }
        CronCommands::Remove { id } => {
            if service.remove(&id).await? {
                println!("Job removed.");
            } else {
                println!("Job not found.");
            }
        }
        CronCommands::Enable { id } => {
            let job = service.enable(&id).await?;
            println!("Job {} enabled.", job.name);
        }
        CronCommands::Disable { id } => {
            let job = service.disable(&id).await?;
            println!("Job {} disabled.", job.name);
        }
        CronCommands::Update {
            id,
            name,
            schedule,
            message,
            description,
        } => {
            let job = service
                .update(
                    &id,
                    JobPatch {
                        name,
                        schedule,
                        payload: message,
                        description,
                        enabled: None,
                    },
                )
                .await?;
            println!("Job {} updated ({}).", job.name, schedule_label(&job));
        }
        CronCommands::Cleanup => {
            let removed = service.cleanup().await?;
            println!("Removed {} disabled jobs.", removed);
        }
    }
    Ok(())
}

fn schedule_label(job: &CronJob) -> String {
    match job.kind {
        ScheduleKind::Cron => job.schedule.clone(),
        ScheduleKind::Interval => format!("every {}", job.schedule),
        ScheduleKind::Once => format!("at {}", job.schedule),
    }
}

fn fmt_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "N/A".to_string())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

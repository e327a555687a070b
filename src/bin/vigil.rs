//! vigil — clinical follow-up daemon and operator CLI.
//!
//! `vigil serve` runs the scheduler, delivery, and analysis workers.
//! The other subcommands are operator actions against the same database.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use vigil_rs::catalog::CatalogRegistry;
use vigil_rs::config::Config;
use vigil_rs::engine::{Daemon, Engine, PeriodOptions, WorkerConfig};
use vigil_rs::llm::{AnthropicAnalyzer, DEFAULT_MODEL};
use vigil_rs::model::*;
use vigil_rs::telemetry::{TelemetryConfig, init_telemetry};
use vigil_rs::transport::ConsoleTransport;

#[derive(Parser)]
#[command(name = "vigil", version, about = "Clinical follow-up engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: scheduling sweeps plus delivery and analysis workers.
    Serve {
        /// Directory of protocol TOML files (loaded at period creation).
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// Queue poll interval in seconds.
        #[arg(long, default_value_t = 5)]
        poll_interval: u64,
    },
    /// Run a single scheduling sweep and exit.
    Sweep,
    /// Staff management.
    #[command(subcommand)]
    Staff(StaffCommand),
    /// Patient management.
    #[command(subcommand)]
    Patient(PatientCommand),
    /// Follow-up period management.
    #[command(subcommand)]
    Period(PeriodCommand),
    /// Alert actions.
    #[command(subcommand)]
    Alert(AlertCommand),
    /// Schedule an in-person visit.
    Visit {
        #[arg(long)]
        patient: Uuid,
        /// Visit date, YYYY-MM-DD.
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        note: Option<String>,
    },
    /// List tasks assigned to a staff member.
    Tasks {
        #[arg(long)]
        assignee: Uuid,
        #[arg(long)]
        status: Option<String>,
    },
    /// Alert workload stats for one tracker.
    Stats {
        #[arg(long)]
        tracker: Uuid,
    },
    /// Dump the event feed after a sequence number.
    Events {
        #[arg(long, default_value_t = 0)]
        since: u64,
    },
}

#[derive(Subcommand)]
enum StaffCommand {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
        /// "tracker" or "doctor".
        #[arg(long)]
        role: String,
    },
}

#[derive(Subcommand)]
enum PatientCommand {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        tracker: Option<Uuid>,
        #[arg(long)]
        doctor: Option<Uuid>,
    },
}

#[derive(Subcommand)]
enum PeriodCommand {
    Start {
        #[arg(long)]
        patient: Uuid,
        /// Start date, YYYY-MM-DD. Defaults to today.
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        duration: u16,
        /// Protocol name from the catalog directory.
        #[arg(long)]
        protocol: Option<String>,
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    Cancel {
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum AlertCommand {
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    Resolve {
        #[arg(long)]
        id: Uuid,
        /// Resolving staff member.
        #[arg(long)]
        by: Option<Uuid>,
    },
    Escalate {
        #[arg(long)]
        id: Uuid,
        /// Explicit escalation target; defaults to the patient's doctor.
        #[arg(long)]
        to: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("loading configuration")?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "vigil-rs".to_string(),
    })
    .context("initializing telemetry")?;

    let cli = Cli::parse();
    let mut engine = Engine::open(&config.database_path).context("opening database")?;

    match cli.command {
        Command::Serve {
            catalog,
            poll_interval,
        } => {
            if let Some(dir) = &catalog {
                // Fail fast on a broken catalog even though periods load
                // protocols at creation time.
                CatalogRegistry::load_from_dir(dir).context("loading protocol catalog")?;
            }

            let analyzer =
                AnthropicAnalyzer::new(&config.anthropic_api_key, DEFAULT_MODEL)
                    .context("building analyzer")?;
            let daemon = Daemon::new(
                engine,
                Arc::new(ConsoleTransport),
                Arc::new(analyzer),
                WorkerConfig {
                    poll_interval: Duration::from_secs(poll_interval),
                    sweep_interval: Duration::from_secs(config.sweep_interval_secs),
                },
            );

            let handle = daemon.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    handle.shutdown();
                }
            });

            daemon.run().await;
        }
        Command::Sweep => {
            let outcome = engine.sweep(Local::now())?;
            println!(
                "scheduled: {} completed: {} errors: {}",
                outcome.scheduled, outcome.completed, outcome.errors
            );
        }
        Command::Staff(StaffCommand::Add { name, phone, role }) => {
            let role = StaffRole::from_str(&role)
                .ok_or_else(|| anyhow!("unknown role: {role} (tracker | doctor)"))?;
            let staff = engine.create_staff(name, &phone, role)?;
            println!("{}", staff.id.0);
        }
        Command::Patient(PatientCommand::Add {
            name,
            phone,
            tracker,
            doctor,
        }) => {
            let patient =
                engine.create_patient(name, &phone, tracker.map(StaffId), doctor.map(StaffId))?;
            println!("{}", patient.id.0);
        }
        Command::Period(PeriodCommand::Start {
            patient,
            start,
            duration,
            protocol,
            catalog,
        }) => {
            let registry = match &catalog {
                Some(dir) => CatalogRegistry::load_from_dir(dir)?,
                None => CatalogRegistry::empty(),
            };
            let protocol = match &protocol {
                Some(name) => Some(
                    registry
                        .get(name)
                        .ok_or_else(|| anyhow!("unknown protocol: {name}"))?,
                ),
                None => None,
            };
            let start = start.unwrap_or_else(|| Local::now().date_naive());
            let period = engine.create_period(
                PatientId(patient),
                start,
                duration,
                PeriodOptions {
                    protocol,
                    ..PeriodOptions::default()
                },
            )?;
            println!("{}", period.id.0);
        }
        Command::Period(PeriodCommand::Cancel { id }) => {
            engine.cancel_period(PeriodId(id))?;
            println!("cancelled");
        }
        Command::Alert(AlertCommand::List { status, limit }) => {
            let status = match status.as_deref() {
                Some(s) => Some(
                    AlertStatus::from_str(s).ok_or_else(|| anyhow!("unknown status: {s}"))?,
                ),
                None => None,
            };
            let alerts = engine.list_alerts(status, None, limit)?;
            println!("{}", serde_json::to_string_pretty(&alerts)?);
        }
        Command::Alert(AlertCommand::Resolve { id, by }) => {
            let alert =
                engine.update_alert_status(AlertId(id), AlertStatus::Resolved, by.map(StaffId))?;
            println!("{}", serde_json::to_string_pretty(&alert)?);
        }
        Command::Alert(AlertCommand::Escalate { id, to }) => {
            let alert = engine
                .escalate_alert(AlertId(id), to.map(StaffId), &ConsoleTransport)
                .await?;
            println!("{}", serde_json::to_string_pretty(&alert)?);
        }
        Command::Visit {
            patient,
            date,
            note,
        } => {
            let visit = engine.create_visit(PatientId(patient), date, note)?;
            println!("{}", visit.id.0);
        }
        Command::Tasks { assignee, status } => {
            let status = match status.as_deref() {
                Some(s) => Some(
                    TaskStatus::from_str(s).ok_or_else(|| anyhow!("unknown status: {s}"))?,
                ),
                None => None,
            };
            let tasks = engine.tasks_for_assignee(StaffId(assignee), status)?;
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        }
        Command::Stats { tracker } => {
            let stats = engine.stats_by_tracker(StaffId(tracker))?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Events { since } => {
            for event in engine.events_since(since)? {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
    }

    Ok(())
}

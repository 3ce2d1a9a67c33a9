//! Binary entrypoint for the starledger CLI.
//!
//! Commands:
//! - `init` - write a starter config file and create the ledger store
//! - `class <id> <name> [--league <league>]` - open a class taught by `--teacher`
//! - `enrol <id> <name> <class> [--guild <guild>]` - enrol a student with a zeroed ledger
//! - `status [--student <id>]` - print a student's ledger, or store metrics, as JSON
//! - `award <student> <stars> <reason>` - set today's stars for a student
//! - `revoke <log-id>` - delete an award log entry
//! - `buy <student> <item>` - purchase from the shop
//! - `use <student> <item>` - consume a power-up
//! - `rollover` - roll every student into the current month
//! - `champions <YYYY-MM>` - recompute guild champions for a closed month
//!
//! See the library crate docs for module-level details: `starledger::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde_json::json;

use starledger::config::Config;
use starledger::ledger::{
    apply_star_award_with_note, buy_item, create_class, create_student, delete_award,
    monthly_history, recompute_guild_champions, rollover_student, use_item, Actor,
    LedgerContext, StudentRecord, TriggerDispatcher,
};
use starledger::metrics;

#[derive(Parser)]
#[command(name = "starledger")]
#[command(about = "Score and economy ledger for a gamified classroom")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "starledger.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Acting teacher id recorded on writes
    #[arg(long, default_value = "admin", global = true)]
    teacher: String,

    /// Acting teacher display name
    #[arg(long, default_value = "Administrator", global = true)]
    teacher_name: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and create the store
    Init,
    /// Open a class
    Class {
        id: String,
        name: String,
        #[arg(long, default_value = "junior")]
        league: String,
    },
    /// Enrol a student into an existing class
    Enrol {
        id: String,
        name: String,
        class: String,
        #[arg(long)]
        guild: Option<String>,
    },
    /// Show a student's ledger or store-wide metrics
    Status {
        #[arg(short, long)]
        student: Option<String>,
    },
    /// Set today's star value for a student
    Award {
        student: String,
        stars: i64,
        reason: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Delete an award log entry and undo its stars
    Revoke { log_id: String },
    /// Buy an item from the shop
    Buy { student: String, item: String },
    /// Use a power-up from a student's inventory
    Use { student: String, item: String },
    /// Roll every student's monthly bucket into the current month
    Rollover,
    /// Recompute guild champions for a closed month (YYYY-MM)
    Champions { month: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        Config::create_default(&cli.config).await?;
        let config = Config::load(&cli.config).await?;
        LedgerContext::open(config.clone())?;
        info!(
            "Configuration written to {}; ledger store at {}",
            cli.config, config.ledger.data_dir
        );
        return Ok(());
    }

    let config = Config::load(&cli.config).await?;
    init_logging(&Some(config.clone()), cli.verbose);
    let ctx = LedgerContext::open(config)?;
    let triggers = TriggerDispatcher::attach(ctx.clone()).spawn();
    let actor = Actor::new(&cli.teacher, &cli.teacher_name);

    let result = run(&ctx, &actor, cli.command);
    ctx.outbox.detach();
    if let Err(e) = triggers.await {
        warn!("trigger dispatcher ended abnormally: {}", e);
    }
    result
}

fn run(ctx: &LedgerContext, actor: &Actor, command: Commands) -> Result<()> {
    match command {
        // Handled in main before the store is opened
        Commands::Init => {}
        Commands::Class { id, name, league } => {
            let class = create_class(ctx, &id, &name, &actor.teacher_id, &league)
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("class {} ({}) opened in league {}", class.id, class.name, class.league);
        }
        Commands::Enrol {
            id,
            name,
            class,
            guild,
        } => {
            let mut student = StudentRecord::new(&id, &name, &class);
            if let Some(guild) = guild.as_deref() {
                student = student.with_guild(guild);
            }
            let student =
                create_student(ctx, student).map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("{} enrolled in {}", student.id, student.class_id);
        }
        Commands::Status { student } => {
            let report = match student {
                Some(id) => json!({
                    "student": ctx.store.get_student(&id)?,
                    "ledger": ctx.store.get_score(&id)?,
                    "history": monthly_history(&ctx.store, &id)?,
                }),
                None => json!({
                    "students": ctx.store.list_student_ids()?.len(),
                    "metrics": metrics::snapshot(),
                }),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Award {
            student,
            stars,
            reason,
            note,
        } => {
            let outcome =
                apply_star_award_with_note(ctx, actor, &student, stars, &reason, note.as_deref())
                    .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            let notes: Vec<&str> = outcome.notes.iter().map(|n| n.label()).collect();
            println!(
                "{}: {:+} stars (today {}), {:+} gold, total {} {}",
                student,
                outcome.delta,
                outcome.effective_stars,
                outcome.gold_delta,
                outcome.total_stars,
                notes.join(", ")
            );
        }
        Commands::Revoke { log_id } => {
            let outcome =
                delete_award(ctx, &log_id).map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!(
                "{}: -{} stars, total {}",
                outcome.student_id, outcome.stars_removed, outcome.total_stars
            );
        }
        Commands::Buy { student, item } => {
            let outcome =
                buy_item(ctx, &student, &item).map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!(
                "{} bought {} for {} gold ({} left)",
                student, outcome.item.name, outcome.price_paid, outcome.gold_remaining
            );
        }
        Commands::Use { student, item } => {
            let outcome = use_item(ctx, actor, &student, &item)
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("{}", outcome.message);
        }
        Commands::Rollover => {
            let mut rolled = 0;
            for id in ctx.store.list_student_ids()? {
                if rollover_student(ctx, &id)?.is_some() {
                    rolled += 1;
                }
            }
            println!("{} students rolled into the current month", rolled);
        }
        Commands::Champions { month } => {
            let champions = recompute_guild_champions(&ctx.store, &month, ctx.clock.now())?;
            println!("{}", serde_json::to_string_pretty(&champions)?);
        }
    }
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    let configured = config
        .as_ref()
        .and_then(|cfg| cfg.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    // CLI verbosity raises the configured level
    let level = match verbosity {
        0 => configured,
        1 => configured.max(log::LevelFilter::Debug),
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(level);

    let log_file = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
    if let Some(file) = log_file {
        let file = std::sync::Mutex::new(file);
        // Foreground runs mirror the file to the console
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let line = format!(
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            );
            if let Ok(mut guard) = file.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}

//! ges-stats - cached school statistics
//!
//! Main entry point for the ges-stats CLI.

use anyhow::Context;
use clap::{Parser, Subcommand};
use ges_rollup::format_rate;
use ges_stats::config::{validate_config_result, GesStatsConfig};
use ges_stats::entity::{EntityScope, EntityType, Period};
use ges_stats::server::StatsServer;
use ges_stats::stats::{EntityStats, StatsService};
use ges_stats::storage::{Dataset, SqliteRepository};
use std::path::{Path, PathBuf};
use std::process;

/// ges-stats - Enrollment and attendance statistics for GES schools
#[derive(Parser, Debug)]
#[command(name = "ges-stats")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/ges-stats/config.yaml)
    #[arg(short, long, env = "GES_STATS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Run the HTTP API
    Serve {
        /// Address to listen on (overrides server.bind)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Show rolled-up statistics for one or more entities
    Stats {
        /// school, circuit, district or region
        entity_type: EntityType,

        /// Entity ids
        #[arg(required = true)]
        ids: Vec<i64>,

        #[arg(short, long)]
        year: Option<i32>,

        #[arg(short, long)]
        term: Option<u8>,

        #[arg(short, long)]
        week: Option<u8>,

        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Drop cached keys matching a glob pattern (e.g. "school:*")
    Invalidate { pattern: String },

    /// Load a JSON dataset into the reporting database
    Import {
        file: PathBuf,

        /// Keep cached statistics instead of invalidating them
        #[arg(long)]
        keep_cache: bool,
    },

    /// Show cache counters and entry count
    CacheStats {
        /// Drop expired entries first
        #[arg(long)]
        purge: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    if let Err(e) = ges_stats::logging::init(level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> ges_stats::Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(GesStatsConfig::default_path);

    if let Commands::Init { force } = cli.command {
        return handle_init_command(&config_path, force);
    }

    // An explicit path must exist; the default path may not
    let config = if cli.config.is_some() {
        GesStatsConfig::load(&config_path)?
    } else {
        GesStatsConfig::load_or_default(&config_path)?
    };
    validate_config_result(&config)?;

    match cli.command {
        Commands::Init { .. } => Ok(()),

        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let stats = StatsService::from_config(&config)?;

            StatsServer::new(stats)
                .with_sweeper(config.sweep_interval())
                .run(&bind)
                .await
                .map_err(|e| ges_stats::StatsError::Other(e.to_string()))
        }

        Commands::Stats {
            entity_type,
            ids,
            year,
            term,
            week,
            json,
        } => {
            let stats = StatsService::from_config(&config)?;
            let period = Period { year, term, week };
            let scopes: Vec<EntityScope> = ids
                .iter()
                .map(|id| EntityScope::new(entity_type, *id))
                .collect();

            let results = stats.entity_stats_many(&scopes, period).await?;

            if json {
                let out: Vec<_> = scopes
                    .iter()
                    .zip(&results)
                    .map(|(scope, stats)| {
                        serde_json::json!({
                            "entityType": scope.entity_type,
                            "id": scope.id,
                            "stats": stats,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                for (scope, entity_stats) in scopes.iter().zip(&results) {
                    print_entity_stats(scope, period, entity_stats);
                }
            }
            Ok(())
        }

        Commands::Invalidate { pattern } => {
            let stats = StatsService::from_config(&config)?;
            let removed = stats.cache().invalidate(&pattern).await?;
            println!("Removed {} cached key(s) matching {}", removed, pattern);
            Ok(())
        }

        Commands::Import { file, keep_cache } => {
            let dataset = Dataset::load(&file)
                .map_err(anyhow::Error::from)
                .with_context(|| format!("Failed to read dataset {}", file.display()))?;

            let repository = SqliteRepository::open(&config.database.path)?;
            let summary = repository.import_dataset(&dataset).await?;

            println!(
                "✓ Imported {} row(s) into {}",
                summary.total(),
                repository.path().display()
            );
            println!("  Schools:            {}", summary.schools);
            println!("  Enrollment:         {}", summary.enrollment);
            println!("  Student attendance: {}", summary.student_attendance);
            println!("  Teacher attendance: {}", summary.teacher_attendance);

            if !keep_cache {
                let stats = StatsService::from_config(&config)?;
                let removed = stats.invalidate_all().await?;
                println!("  Invalidated {} cached key(s)", removed);
            }
            Ok(())
        }

        Commands::CacheStats { purge } => {
            let stats = StatsService::from_config(&config)?;
            if purge {
                let removed = stats.cache().purge_expired().await?;
                println!("Purged {} expired entries", removed);
            }

            let cache_stats = stats.cache().stats().await;
            println!("Backend: {}", cache_stats.backend);
            match cache_stats.entries {
                Some(entries) => println!("Entries: {}", entries),
                None => println!("Entries: unavailable"),
            }
            Ok(())
        }
    }
}

fn handle_init_command(config_file: &Path, force: bool) -> ges_stats::Result<()> {
    if config_file.exists() && !force {
        println!("Configuration already exists at {}", config_file.display());
        println!("Use --force to overwrite it.");
        return Ok(());
    }

    let config = GesStatsConfig::default();
    config.save(config_file)?;

    println!("✓ Created configuration at {}", config_file.display());
    println!();
    println!("Next steps:");
    println!("  1. Load reporting data:");
    println!("     ges-stats import dataset.json");
    println!();
    println!("  2. Query statistics:");
    println!("     ges-stats stats district 12 --year 2024 --term 1");
    println!();
    println!("  3. Serve the API on {}:", config.server.bind);
    println!("     ges-stats serve");

    Ok(())
}

fn print_entity_stats(scope: &EntityScope, period: Period, stats: &EntityStats) {
    println!(
        "{} {} ({})",
        capitalize(scope.entity_type.as_str()),
        scope.id,
        describe_period(period)
    );

    let enrolment = &stats.enrolment;
    println!("  Enrolment");
    println!("    Total students:      {}", enrolment.total_students);
    println!(
        "    Boys / girls:        {} / {}",
        enrolment.gender_distribution.boys, enrolment.gender_distribution.girls
    );

    let students = &stats.student_attendance;
    println!("  Student attendance");
    println!("    Present / enrolled:  {} / {}", students.total_present, students.total_enrolled);
    println!("    Attendance rate:     {}%", students.attendance_rate);

    let teachers = &stats.teacher_attendance;
    println!("  Teacher attendance");
    println!("    Teachers:            {}", teachers.total_teachers);
    println!("    Attendance rate:     {}%", format_rate(teachers.attendance_rate));
    println!("    Punctuality rate:    {}%", format_rate(teachers.punctuality_rate));
    println!(
        "    Exercises marked:    {}%",
        format_rate(teachers.exercise_completion_rate)
    );
    println!();
}

fn describe_period(period: Period) -> String {
    let mut parts = Vec::new();
    if let Some(year) = period.year {
        parts.push(year.to_string());
    }
    if let Some(term) = period.term {
        parts.push(format!("term {}", term));
    }
    if let Some(week) = period.week {
        parts.push(format!("week {}", week));
    }
    if parts.is_empty() {
        "all periods".to_string()
    } else {
        parts.join(", ")
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

//! migrationpilot — PostgreSQL migration safety checks
//!
//! # Usage
//!
//! ```bash
//! # Check migrations before they reach production
//! migrationpilot analyze migrations/*.sql
//!
//! # Apply the mechanical fixes in place
//! migrationpilot fix migrations/0042_add_index.sql --write
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use serde_json::json;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

use migrationpilot::analysis::{Analyzer, FileAnalysis};
use migrationpilot::config::{Config, FailOn};
use migrationpilot::fix::FIXABLE_RULES;
use migrationpilot::risk::RiskLevel;
use migrationpilot::rules::{all_rules, find_rule, Severity, Violation};

#[derive(Parser)]
#[command(name = "migrationpilot")]
#[command(version)]
#[command(about = "Static safety analysis for PostgreSQL migrations", long_about = None)]
#[command(after_help = "EXAMPLES:
    migrationpilot analyze migrations/*.sql          # Lint migrations
    migrationpilot analyze up.sql --format json      # Machine-readable report
    migrationpilot fix up.sql --write                # Apply auto-fixes
    migrationpilot explain MP001                     # Rule details")]
struct Cli {
    /// Config file (default: ./migrationpilot.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Target PostgreSQL major version
    #[arg(long, global = true, env = "MIGRATIONPILOT_PG_VERSION")]
    pg_version: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliFailOn {
    Critical,
    Warning,
    Never,
}

impl From<CliFailOn> for FailOn {
    fn from(val: CliFailOn) -> Self {
        match val {
            CliFailOn::Critical => FailOn::Critical,
            CliFailOn::Warning => FailOn::Warning,
            CliFailOn::Never => FailOn::Never,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze migration files
    Analyze {
        /// Migration files
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
        /// Production snapshot (JSON), overrides the config file
        #[arg(short, long)]
        production: Option<PathBuf>,
        /// Lowest severity that fails the run, overrides the config file
        #[arg(long, value_enum)]
        fail_on: Option<CliFailOn>,
    },
    /// Apply automatic fixes to a migration
    Fix {
        /// Migration file
        file: PathBuf,
        /// Rewrite the file in place instead of printing the result
        #[arg(short, long)]
        write: bool,
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// List every rule
    Rules {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Show what a rule checks and why
    Explain {
        /// Rule ID, e.g. MP001
        rule: String,
    },
}

/// Analysis of one file from a batch, in input order.
struct Outcome {
    path: PathBuf,
    result: Result<FileAnalysis>,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("MIGRATIONPILOT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(version) = cli.pg_version {
        config.pg_version = version;
        config.validate()?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Analyze {
            files,
            format,
            production,
            fail_on,
        } => {
            let mut config = load_config(&cli)?;
            if let Some(path) = production {
                config.production_context = Some(path.clone());
            }
            if let Some(fail_on) = fail_on {
                config.fail_on = (*fail_on).into();
            }
            analyze_files(&config, files, *format).await
        }
        Commands::Fix {
            file,
            write,
            format,
        } => {
            let config = load_config(&cli)?;
            fix_file(&config, file, *write, *format).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Rules { format } => {
            let config = load_config(&cli)?;
            list_rules(&config, *format)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Explain { rule } => {
            explain_rule(rule)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn analyze_files(config: &Config, files: &[PathBuf], format: OutputFormat) -> Result<ExitCode> {
    let analyzer = Arc::new(Analyzer::from_config(config).context("Failed to set up analysis")?);

    let mut tasks = JoinSet::new();
    for (index, path) in files.iter().cloned().enumerate() {
        let analyzer = Arc::clone(&analyzer);
        tasks.spawn(async move {
            let result = analyze_one(analyzer, &path).await;
            (index, Outcome { path, result })
        });
    }

    let mut outcomes: Vec<(usize, Outcome)> = Vec::with_capacity(files.len());
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(joined.context("Analysis task panicked")?);
    }
    outcomes.sort_by_key(|(index, _)| *index);
    let outcomes: Vec<Outcome> = outcomes.into_iter().map(|(_, outcome)| outcome).collect();

    match format {
        OutputFormat::Text => print_text_report(&outcomes),
        OutputFormat::Json => print_json_report(&outcomes, config)?,
    }

    let failed = outcomes.iter().any(|o| o.result.is_err());
    let triggered = outcomes
        .iter()
        .filter_map(|o| o.result.as_ref().ok())
        .flat_map(|a| &a.violations)
        .any(|v| config.fail_on.is_triggered_by(v.severity));

    Ok(if failed {
        ExitCode::from(2)
    } else if triggered {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

async fn analyze_one(analyzer: Arc<Analyzer>, path: &Path) -> Result<FileAnalysis> {
    let sql = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file = path.to_path_buf();
    let mut analysis = tokio::task::spawn_blocking(move || analyzer.analyze(&sql)).await??;
    analysis.file = Some(file);
    Ok(analysis)
}

fn risk_label(level: RiskLevel, score: u32) -> ColoredString {
    let text = format!("{} ({})", level, score);
    match level {
        RiskLevel::Red => text.red().bold(),
        RiskLevel::Yellow => text.yellow().bold(),
        RiskLevel::Green => text.green().bold(),
    }
}

fn print_violation(violation: &Violation) {
    let icon = match violation.severity {
        Severity::Critical => "✗".red(),
        Severity::Warning => "⚠".yellow(),
    };
    println!(
        "  {} {} {} {}",
        icon,
        violation.rule_id.white().bold(),
        violation.rule_name.dimmed(),
        format!("line {}", violation.line).dimmed()
    );
    println!("    {}", violation.message);
    if let Some(alternative) = &violation.safe_alternative {
        for line in alternative.lines() {
            println!("    {} {}", "→".dimmed(), line.dimmed());
        }
    }
}

fn print_text_report(outcomes: &[Outcome]) {
    let mut critical = 0;
    let mut warnings = 0;

    for outcome in outcomes {
        let name = outcome.path.display().to_string();
        match &outcome.result {
            Err(e) => {
                println!("{} {}", name.white().bold(), "failed".red().bold());
                println!("  {} {:#}", "✗".red(), e);
                println!();
            }
            Ok(analysis) => {
                let risk = &analysis.overall_risk;
                println!("{} {}", name.white().bold(), risk_label(risk.level, risk.score));
                if analysis.is_clean() {
                    println!("  {}", "✓ No issues found".green());
                }
                for violation in &analysis.violations {
                    print_violation(violation);
                }
                println!();
                critical += analysis.count(Severity::Critical);
                warnings += analysis.count(Severity::Warning);
            }
        }
    }

    if critical > 0 {
        println!("{} {} critical", "✗".red(), critical);
    }
    if warnings > 0 {
        println!("{} {} warning(s)", "⚠".yellow(), warnings);
    }
    if critical == 0 && warnings == 0 {
        println!("{}", "✓ All migrations passed".green().bold());
    }
}

fn print_json_report(outcomes: &[Outcome], config: &Config) -> Result<()> {
    let files: Vec<serde_json::Value> = outcomes
        .iter()
        .map(|outcome| match &outcome.result {
            Ok(analysis) => serde_json::to_value(analysis).unwrap_or_else(|e| {
                json!({ "file": outcome.path, "error": e.to_string() })
            }),
            Err(e) => json!({ "file": outcome.path, "error": format!("{:#}", e) }),
        })
        .collect();

    let report = json!({
        "generatedAt": chrono::Utc::now().to_rfc3339(),
        "pgVersion": config.pg_version,
        "files": files,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn fix_file(config: &Config, path: &Path, write: bool, format: OutputFormat) -> Result<()> {
    let sql = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let analyzer = Analyzer::from_config(config)?;
    let result = analyzer.fix(&sql)?;

    if write && result.fixed_count > 0 {
        tokio::fs::write(path, &result.fixed_sql)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => {
            if !write {
                print!("{}", result.fixed_sql);
            }
            eprintln!(
                "{} {} fix(es) applied to {}",
                "✓".green(),
                result.fixed_count,
                path.display()
            );
            for violation in &result.unfixable {
                eprintln!(
                    "  {} {} line {}: {}",
                    "⚠".yellow(),
                    violation.rule_id,
                    violation.line,
                    violation.message
                );
            }
        }
    }
    Ok(())
}

fn list_rules(config: &Config, format: OutputFormat) -> Result<()> {
    let rules = all_rules();
    let is_disabled =
        |id: &str| config.rules.disabled.iter().any(|d| d.eq_ignore_ascii_case(id));

    match format {
        OutputFormat::Json => {
            let list: Vec<serde_json::Value> = rules
                .iter()
                .map(|rule| {
                    let meta = rule.meta();
                    json!({
                        "id": meta.id,
                        "name": meta.name,
                        "severity": meta.severity,
                        "description": meta.description,
                        "autoFixable": FIXABLE_RULES.contains(&meta.id),
                        "enabled": !is_disabled(meta.id),
                        "docsUrl": rule.docs_url(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&list)?);
        }
        OutputFormat::Text => {
            println!(
                "{:7} {:45} {:9} {}",
                "ID".white().bold(),
                "Name".white().bold(),
                "Severity".white().bold(),
                "Description".white().bold()
            );
            println!("{}", "─".repeat(100).dimmed());
            for rule in &rules {
                let meta = rule.meta();
                let severity = match meta.severity {
                    Severity::Critical => "critical".red(),
                    Severity::Warning => "warning".yellow(),
                };
                let id = if is_disabled(meta.id) {
                    meta.id.dimmed().strikethrough()
                } else {
                    meta.id.cyan().bold()
                };
                println!("{:7} {:45} {:9} {}", id, meta.name, severity, meta.description);
            }
        }
    }
    Ok(())
}

fn explain_rule(id: &str) -> Result<()> {
    let Some(rule) = find_rule(id) else {
        anyhow::bail!("Unknown rule '{}'. Run `migrationpilot rules` for the list.", id);
    };
    let meta = rule.meta();

    println!("{} {}", meta.id.cyan().bold(), meta.name.white().bold());
    println!();
    println!("  {} {}", "Severity:".dimmed(), meta.severity);
    println!("  {} {}", "Checks:".dimmed(), meta.description);
    println!("  {} {}", "Why:".dimmed(), meta.why_it_matters);
    println!(
        "  {} {}",
        "Auto-fix:".dimmed(),
        if FIXABLE_RULES.contains(&meta.id) { "yes" } else { "no" }
    );
    println!("  {} {}", "Docs:".dimmed(), rule.docs_url());
    Ok(())
}

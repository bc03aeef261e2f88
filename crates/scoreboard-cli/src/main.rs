//! Scoreboard - round settlement CLI
//!
//! The `scoreboard` command drives the settlement engine against a
//! SurrealDB store.
//!
//! ## Commands
//!
//! - `init`: create the schema
//! - `team` / `challenge` / `target`: register competition entities
//! - `record`: record attack events and availability failures
//! - `settle`: settle the most recently completed round
//! - `aggregate`: recompute every score from the ledger
//! - `standings` / `ledger`: inspect results

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use scoreboard_state::{
    AttackEvent, AvailabilityFailure, ChallengeId, CompetitionRegistry, Round, ScoreStore,
    SurrealScoreStore, TargetId, TeamId,
};
use serde::Serialize;
use settlement_core::{Aggregator, FixedRoundClock, RoundSettlement, ScoringConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "scoreboard")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Attack-defense round settlement engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// SurrealDB URL (mem://, surrealkv://path, ws://host:port).
    /// Falls back to SURREALDB_* variables, then a local surrealkv store.
    #[arg(long, global = true, env = "SCOREBOARD_DB")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create tables and indexes (idempotent)
    Init,

    /// Manage teams
    Team {
        #[command(subcommand)]
        action: TeamAction,
    },

    /// Manage challenges
    Challenge {
        #[command(subcommand)]
        action: ChallengeAction,
    },

    /// Manage targets
    Target {
        #[command(subcommand)]
        action: TargetAction,
    },

    /// Record round events
    Record {
        #[command(subcommand)]
        action: RecordAction,
    },

    /// Settle the round before `--current-round`
    Settle(SettleArgs),

    /// Recompute every target and team score from the ledger
    Aggregate,

    /// Show team standings
    Standings {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show ledger entries
    Ledger {
        /// Only entries for this round
        #[arg(short, long)]
        round: Option<u32>,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
enum TeamAction {
    /// Register a team
    Add { id: u64, name: String },
    /// List teams
    List,
}

#[derive(Subcommand)]
enum ChallengeAction {
    /// Register a challenge
    Add {
        id: u64,
        title: String,
        #[arg(long, default_value = "1000")]
        base_score: f64,
    },
    /// List challenges
    List,
}

#[derive(Subcommand)]
enum TargetAction {
    /// Register a team's instance of a challenge
    Add {
        id: u64,
        #[arg(long)]
        team: u64,
        #[arg(long)]
        challenge: u64,
        /// Exclude the target from its team's score
        #[arg(long)]
        hidden: bool,
    },
    /// List targets
    List,
}

#[derive(Subcommand)]
enum RecordAction {
    /// A successful attack on a target
    Attack {
        #[arg(long)]
        attacker: u64,
        #[arg(long)]
        victim: u64,
        #[arg(long)]
        round: u32,
    },
    /// A failed availability check
    Failure {
        #[arg(long)]
        team: u64,
        #[arg(long)]
        target: u64,
        #[arg(long)]
        challenge: u64,
        #[arg(long)]
        round: u32,
    },
}

#[derive(Args)]
struct SettleArgs {
    /// Round currently in progress; `current_round - 1` is settled
    #[arg(long, env = "SCOREBOARD_CURRENT_ROUND")]
    current_round: u32,

    /// TOML file with `attack_score`, `check_down_score`, `settle_timeout_ms`
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    attack_score: Option<f64>,

    #[arg(long)]
    checkdown_score: Option<f64>,

    #[arg(long)]
    timeout_ms: Option<u64>,

    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    settlement_core::telemetry::init_tracing(cli.json, level);

    let store = Arc::new(open_store(cli.db.as_deref()).await?);

    match cli.command {
        Commands::Init => {
            // Opening the store already ran the migrations.
            println!("Scoreboard schema ready");
            Ok(())
        }
        Commands::Team { action } => match action {
            TeamAction::Add { id, name } => {
                let team = store.register_team(TeamId(id), &name).await?;
                println!("Registered team {} ({})", team.id, team.name);
                Ok(())
            }
            TeamAction::List => cmd_team_list(store.as_ref()).await,
        },
        Commands::Challenge { action } => match action {
            ChallengeAction::Add {
                id,
                title,
                base_score,
            } => {
                let challenge = store
                    .register_challenge(ChallengeId(id), &title, base_score)
                    .await?;
                println!(
                    "Registered challenge {} ({}, base {})",
                    challenge.id, challenge.title, challenge.base_score
                );
                Ok(())
            }
            ChallengeAction::List => cmd_challenge_list(store.as_ref()).await,
        },
        Commands::Target { action } => match action {
            TargetAction::Add {
                id,
                team,
                challenge,
                hidden,
            } => {
                let target = store
                    .register_target(TargetId(id), TeamId(team), ChallengeId(challenge), !hidden)
                    .await?;
                println!(
                    "Registered target {} (team {}, challenge {})",
                    target.id, target.team_id, target.challenge_id
                );
                Ok(())
            }
            TargetAction::List => cmd_target_list(store.as_ref()).await,
        },
        Commands::Record { action } => cmd_record(store.as_ref(), action).await,
        Commands::Settle(args) => cmd_settle(store, args).await,
        Commands::Aggregate => {
            let aggregates = Aggregator::new(store).recompute().await?;
            println!(
                "Recomputed {} targets and {} teams",
                aggregates.targets.len(),
                aggregates.teams.len()
            );
            Ok(())
        }
        Commands::Standings { format } => cmd_standings(store.as_ref(), format).await,
        Commands::Ledger { round, format } => {
            cmd_ledger(store.as_ref(), round.map(Round), format).await
        }
    }
}

async fn open_store(url: Option<&str>) -> Result<SurrealScoreStore> {
    let store = match url {
        Some(url) => SurrealScoreStore::connect(url).await,
        None => SurrealScoreStore::from_env().await,
    };
    store.context("Failed to connect to scoreboard database")
}

/// Layer scoring config: file (or environment) first, then flags.
fn load_scoring_config(args: &SettleArgs) -> Result<ScoringConfig> {
    let mut config = match &args.config {
        Some(path) => read_config_file(path)?,
        None => ScoringConfig::from_env()?,
    };
    if let Some(v) = args.attack_score {
        config.attack_score = v;
    }
    if let Some(v) = args.checkdown_score {
        config.check_down_score = v;
    }
    if let Some(v) = args.timeout_ms {
        config.settle_timeout_ms = v;
    }
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<ScoringConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("Invalid config file {}", path.display()))
}

async fn cmd_settle(store: Arc<SurrealScoreStore>, args: SettleArgs) -> Result<()> {
    let config = load_scoring_config(&args)?;
    info!(
        attack_score = config.attack_score,
        check_down_score = config.check_down_score,
        timeout_ms = config.settle_timeout_ms,
        "scoring config loaded"
    );

    let clock = Arc::new(FixedRoundClock(Round(args.current_round)));
    let settlement = RoundSettlement::new(store, clock, config)?;
    let report = settlement.settle_round().await;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => println!("{report}"),
    }

    if !report.is_success() {
        bail!(
            "settlement failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn cmd_record(store: &SurrealScoreStore, action: RecordAction) -> Result<()> {
    match action {
        RecordAction::Attack {
            attacker,
            victim,
            round,
        } => {
            store
                .record_attack(AttackEvent {
                    attacker_team_id: TeamId(attacker),
                    victim_target_id: TargetId(victim),
                    round: Round(round),
                })
                .await?;
            println!("Recorded attack by team {attacker} on target {victim} in round {round}");
        }
        RecordAction::Failure {
            team,
            target,
            challenge,
            round,
        } => {
            store
                .record_availability_failure(AvailabilityFailure {
                    team_id: TeamId(team),
                    target_id: TargetId(target),
                    challenge_id: ChallengeId(challenge),
                    round: Round(round),
                })
                .await?;
            println!("Recorded failure of target {target} in round {round}");
        }
    }
    Ok(())
}

async fn cmd_team_list(store: &dyn ScoreStore) -> Result<()> {
    let teams = store.teams().await?;
    if teams.is_empty() {
        println!("No teams registered");
    }
    for team in teams {
        println!("{:>6}  {}", team.id, team.name);
    }
    Ok(())
}

async fn cmd_challenge_list(store: &dyn ScoreStore) -> Result<()> {
    let challenges = store.challenges().await?;
    if challenges.is_empty() {
        println!("No challenges registered");
    }
    for challenge in challenges {
        println!(
            "{:>6}  {:<24} base {}",
            challenge.id, challenge.title, challenge.base_score
        );
    }
    Ok(())
}

async fn cmd_target_list(store: &dyn ScoreStore) -> Result<()> {
    let targets = store.targets().await?;
    if targets.is_empty() {
        println!("No targets registered");
    }
    for target in targets {
        println!(
            "{:>6}  team {:>4}  challenge {:>4}  {:>10.2}{}",
            target.id,
            target.team_id,
            target.challenge_id,
            target.score,
            if target.visible { "" } else { "  (hidden)" }
        );
    }
    Ok(())
}

#[derive(Debug, Serialize, PartialEq)]
struct Standing {
    rank: usize,
    team_id: TeamId,
    name: String,
    score: f64,
}

/// Teams by score, highest first; ties keep team id order.
fn rank_teams(mut teams: Vec<scoreboard_state::Team>) -> Vec<Standing> {
    teams.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
    teams
        .into_iter()
        .enumerate()
        .map(|(i, team)| Standing {
            rank: i + 1,
            team_id: team.id,
            name: team.name,
            score: team.score,
        })
        .collect()
}

async fn cmd_standings(store: &dyn ScoreStore, format: OutputFormat) -> Result<()> {
    let standings = rank_teams(store.teams().await?);
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&standings)?),
        OutputFormat::Text => {
            for s in &standings {
                println!("{:>3}. {:<24} {:>12.2}", s.rank, s.name, s.score);
            }
        }
    }
    Ok(())
}

async fn cmd_ledger(
    store: &dyn ScoreStore,
    round: Option<Round>,
    format: OutputFormat,
) -> Result<()> {
    let entries = store.ledger_entries(round).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No ledger entries");
            }
            for e in &entries {
                println!(
                    "round {:>4}  team {:>4}  target {:>6}  {:<15} {:>+10.2}",
                    e.round,
                    e.team_id,
                    e.target_id,
                    e.reason.as_str(),
                    e.delta
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scoreboard_state::Team;
    use std::io::Write;

    fn settle_args(config: Option<PathBuf>) -> SettleArgs {
        SettleArgs {
            current_round: 3,
            config,
            attack_score: None,
            checkdown_score: None,
            timeout_ms: None,
            format: OutputFormat::Text,
        }
    }

    #[test]
    fn test_cli_parses_settle() {
        let cli = Cli::try_parse_from([
            "scoreboard",
            "--db",
            "mem://",
            "settle",
            "--current-round",
            "6",
            "--attack-score",
            "100",
        ])
        .unwrap();
        assert_eq!(cli.db.as_deref(), Some("mem://"));
        match cli.command {
            Commands::Settle(args) => {
                assert_eq!(args.current_round, 6);
                assert_eq!(args.attack_score, Some(100.0));
            }
            _ => panic!("expected settle"),
        }
    }

    #[test]
    fn test_config_file_then_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "attack_score = 80.0\ncheck_down_score = 10.0").unwrap();

        let mut args = settle_args(Some(file.path().to_path_buf()));
        args.checkdown_score = Some(25.0);
        let config = load_scoring_config(&args).unwrap();

        assert_eq!(config.attack_score, 80.0);
        assert_eq!(config.check_down_score, 25.0);
        assert_eq!(config.settle_timeout_ms, 30_000);
    }

    #[test]
    fn test_invalid_flag_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "attack_score = 80.0").unwrap();

        let mut args = settle_args(Some(file.path().to_path_buf()));
        args.timeout_ms = Some(0);
        assert!(load_scoring_config(&args).is_err());
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let args = settle_args(Some(PathBuf::from("/nonexistent/scoring.toml")));
        let err = load_scoring_config(&args).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_rank_teams_orders_by_score_then_id() {
        let team = |id, score| Team {
            id: TeamId(id),
            name: format!("team-{id}"),
            score,
        };
        let ranked = rank_teams(vec![team(3, 900.0), team(1, 1200.0), team(2, 900.0)]);
        let order: Vec<_> = ranked.iter().map(|s| (s.rank, s.team_id)).collect();
        assert_eq!(order, vec![(1, TeamId(1)), (2, TeamId(2)), (3, TeamId(3))]);
    }

    #[tokio::test]
    async fn test_settle_command_against_memory_db() {
        let store = Arc::new(open_store(Some("mem://")).await.unwrap());
        store.register_team(TeamId(1), "alpha").await.unwrap();
        store.register_team(TeamId(2), "bravo").await.unwrap();
        store
            .register_challenge(ChallengeId(1), "web", 100.0)
            .await
            .unwrap();
        store
            .register_target(TargetId(11), TeamId(1), ChallengeId(1), true)
            .await
            .unwrap();
        store
            .register_target(TargetId(21), TeamId(2), ChallengeId(1), true)
            .await
            .unwrap();
        cmd_record(
            store.as_ref(),
            RecordAction::Attack {
                attacker: 1,
                victim: 21,
                round: 2,
            },
        )
        .await
        .unwrap();

        let mut args = settle_args(None);
        args.attack_score = Some(10.0);
        args.checkdown_score = Some(10.0);
        cmd_settle(store.clone(), args).await.unwrap();

        let standings = rank_teams(store.teams().await.unwrap());
        assert_eq!(standings[0].team_id, TeamId(1));
        assert_eq!(standings[0].score, 110.0);
        assert_eq!(standings[1].score, 90.0);
    }
}

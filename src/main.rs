use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pokerush_rl::dashboard::DashboardState;
use pokerush_rl::env::{Edition, MemoryMap, RamImage, location_name, read_state};
use pokerush_rl::exploration::ExplorationMap;
use pokerush_rl::qlearn::{AgentConfig, QAgent};
use pokerush_rl::run_log::list_runs;
use pokerush_rl::scoreboard::Scoreboard;

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(
    name = "pokerush-rl",
    about = "Offline tools for Q-learning speedrun data"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the ranked leaderboard for an edition
    Scoreboard(EditionArgs),
    /// List run directories with their summaries
    Runs(EditionArgs),
    /// Summarize a stored Q-table
    InspectQtable(InspectQtableArgs),
    /// Summarize a stored exploration map
    InspectMap(InspectMapArgs),
    /// Decode a raw RAM dump into the dashboard view
    InspectRam(InspectRamArgs),
}

#[derive(Parser)]
struct EditionArgs {
    #[arg(long, value_enum, default_value_t = Edition::Red)]
    edition: Edition,
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

#[derive(Parser)]
struct InspectQtableArgs {
    #[arg(long, default_value = "data/q_table.json")]
    path: PathBuf,
    /// Show this many states with the highest action value
    #[arg(long, default_value = "10")]
    top: usize,
}

#[derive(Parser)]
struct InspectMapArgs {
    #[arg(long, default_value = "data/exploration_map.bin")]
    path: PathBuf,
}

#[derive(Parser)]
struct InspectRamArgs {
    #[arg(long)]
    dump: PathBuf,
    #[arg(long, value_enum, default_value_t = Edition::Red)]
    edition: Edition,
}

// =============================================================================
// Commands
// =============================================================================

fn scoreboard(args: &EditionArgs) -> Result<()> {
    let board = Scoreboard::open(&args.log_dir, args.edition);
    if board.entries().is_empty() {
        println!("No finished runs for {}.", args.edition);
        return Ok(());
    }
    println!(
        "{:>4}  {:>6}  {:>6}  {:>10}  {:<14}  last split",
        "rank", "run", "badges", "time (s)", "reason"
    );
    for (rank, entry) in board.entries().iter().enumerate() {
        let reason = entry.completion_reason.map_or("-", |r| r.as_str());
        let last = entry.splits.last().map_or("-", |s| s.name.as_str());
        println!(
            "{:>4}  {:>6}  {:>6}  {:>10.1}  {:<14}  {}",
            rank + 1,
            entry.run_id,
            entry.badges,
            entry.total_time_seconds,
            reason,
            last
        );
    }
    Ok(())
}

fn runs(args: &EditionArgs) -> Result<()> {
    let runs = list_runs(&args.log_dir, args.edition)?;
    if runs.is_empty() {
        println!("No runs for {}.", args.edition);
    }
    for (id, summary) in runs {
        match summary {
            Some(run) => println!(
                "run_{id:04}  started {}  steps {:>8}  badges {}  splits {}  {}",
                run.started_at,
                run.total_steps,
                run.final_badges,
                run.splits.len(),
                run.completion_reason.map_or("-", |r| r.as_str()),
            ),
            None => println!("run_{id:04}  (in progress or interrupted)"),
        }
    }
    Ok(())
}

fn inspect_qtable(args: &InspectQtableArgs) -> Result<()> {
    let mut agent = QAgent::new(&AgentConfig::default());
    agent.try_load(&args.path)?;
    let stats = agent.stats();
    println!("Q-table: {}", args.path.display());
    println!("  states:        {}", stats.states_seen);
    println!("  updates:       {}", stats.total_updates);
    println!("  nonzero values {}", stats.table_size);

    let mut ranked: Vec<_> = agent
        .table()
        .iter()
        .map(|(key, _)| {
            let best = agent.greedy_action(key);
            (*key, best, agent.q_value(key, best))
        })
        .collect();
    ranked.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| a.0.cmp(&b.0)));
    for (key, action, value) in ranked.into_iter().take(args.top) {
        println!(
            "  {:<16} {:<20} best {:<5} {value:>9.4}",
            key.to_string(),
            location_name(key.location),
            action.name()
        );
    }
    Ok(())
}

fn inspect_map(args: &InspectMapArgs) -> Result<()> {
    let map = ExplorationMap::try_load(&args.path)?;
    println!("Exploration map: {}", args.path.display());
    println!("  explored cells: {}", map.get_explored_count());
    for (location, cells) in map.location_counts() {
        println!("  {:<28} {cells:>6}", location_name(location));
    }
    Ok(())
}

fn inspect_ram(args: &InspectRamArgs) -> Result<()> {
    let image = RamImage::from_dump(&args.dump)?;
    let state = read_state(&image, &MemoryMap::for_edition(args.edition), args.edition)?;
    let view = DashboardState::project(&state, 0, 0.0);
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Scoreboard(args) => scoreboard(args),
        Commands::Runs(args) => runs(args),
        Commands::InspectQtable(args) => inspect_qtable(args),
        Commands::InspectMap(args) => inspect_map(args),
        Commands::InspectRam(args) => inspect_ram(args),
    }
}

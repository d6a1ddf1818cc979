//! Cascade CLI — command-line interface for the work pipeline engine.
//!
//! Reuses the cascade-core domain logic (stores, transition engine,
//! patrol runner) against a local SQLite database.

use std::time::Duration;

use cascade_cli::commands;

use cascade_core::models::work::UpdateWorkInput;
use cascade_core::patrol::PatrolConfig;
use cascade_core::store::ListWorkFilter;
use clap::{Parser, Subcommand};

/// Cascade CLI — pipeline-driven work item engine
#[derive(Parser)]
#[command(name = "cascade", version, about = "Cascade CLI — pipeline-driven work item engine")]
pub struct Cli {
    /// Path to the SQLite database file
    #[arg(long, env = "CASCADE_DB_PATH", default_value = "cascade.db")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage cascade (pipeline) definitions
    Cascade {
        #[command(subcommand)]
        action: CascadeAction,
    },

    /// Manage work items
    Work {
        #[command(subcommand)]
        action: WorkAction,
    },

    /// Manage dependency edges between work items
    Dep {
        #[command(subcommand)]
        action: DepAction,
    },

    /// Run an autonomous patrol worker
    Patrol {
        #[command(subcommand)]
        action: PatrolAction,
    },

    /// Claim, process, and release a single work item (debug)
    Process {
        /// Work item ID
        id: String,
        /// Claim identity to process under
        #[arg(long, default_value = "cli")]
        name: String,
        /// Shell command to execute tasks with (task text on stdin)
        #[arg(long, env = "CASCADE_EXECUTOR_CMD")]
        executor_cmd: Option<String>,
        /// Executor timeout in seconds for non-heavy stages
        #[arg(long, default_value_t = 300)]
        timeout: u64,
        /// Log what would run without invoking the executor
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum CascadeAction {
    /// Create a cascade from an ordered stage list
    Create {
        /// Cascade name
        name: String,
        /// Ordered stage names (comma-separated)
        #[arg(long, value_delimiter = ',')]
        stages: Vec<String>,
        /// Processor text for a stage, as stage=text (repeatable)
        #[arg(long = "processor", value_parser = parse_key_val)]
        processors: Vec<(String, String)>,
        /// Mark a stage as heavyweight (repeatable)
        #[arg(long = "heavy")]
        heavy: Vec<String>,
        /// Human-readable description
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List all cascades
    List,
    /// Show one cascade
    Show {
        /// Cascade name
        name: String,
    },
    /// Delete a cascade (work items referencing it are kept)
    Delete {
        /// Cascade name
        name: String,
    },
}

#[derive(Subcommand)]
enum WorkAction {
    /// Add a work item
    Add {
        /// Item title
        title: String,
        /// Cascade the item flows through
        #[arg(long)]
        cascade: String,
        /// Starting stage (defaults to the cascade's first stage)
        #[arg(long)]
        stage: Option<String>,
        /// Item body text
        #[arg(long)]
        content: Option<String>,
        /// Priority (lower is more urgent)
        #[arg(long, default_value_t = 3)]
        priority: i64,
        /// Item type label
        #[arg(long = "type", default_value = "task")]
        item_type: String,
        /// Parent item ID
        #[arg(long)]
        parent_id: Option<String>,
        /// Item IDs this one is blocked by (repeatable)
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
        /// Project label
        #[arg(long)]
        project: Option<String>,
        /// Creator identity
        #[arg(long)]
        created_by: Option<String>,
    },
    /// Get a work item by ID
    Get {
        /// Work item ID
        id: String,
    },
    /// List work items
    List {
        /// Filter by cascade
        #[arg(long)]
        cascade: Option<String>,
        /// Filter by stage
        #[arg(long)]
        stage: Option<String>,
        /// Filter by project
        #[arg(long)]
        project: Option<String>,
        /// Include items in terminal stages
        #[arg(long)]
        include_done: bool,
        /// Maximum number of items
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// List items ready to be worked on (unclaimed, unblocked, non-terminal)
    Ready {
        /// Filter by cascade
        #[arg(long)]
        cascade: Option<String>,
        /// Filter by stage
        #[arg(long)]
        stage: Option<String>,
        /// Filter by project
        #[arg(long)]
        project: Option<String>,
        /// Maximum number of items
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Advance an item to its next stage
    Advance {
        /// Work item ID
        id: String,
        /// Identity recorded on the transition
        #[arg(long, default_value = "cli")]
        by: String,
        /// Replace the item's content
        #[arg(long)]
        content: Option<String>,
    },
    /// Move an item to a specific stage
    SetStage {
        /// Work item ID
        id: String,
        /// Target stage name
        stage: String,
        /// Identity recorded on the transition
        #[arg(long, default_value = "cli")]
        by: String,
        /// Replace the item's content
        #[arg(long)]
        content: Option<String>,
    },
    /// Claim an item for exclusive processing
    Claim {
        /// Work item ID
        id: String,
        /// Claim owner identity
        #[arg(long)]
        owner: String,
    },
    /// Release an item's claim
    Release {
        /// Work item ID
        id: String,
    },
    /// Move an item directly to its terminal stage
    Done {
        /// Work item ID
        id: String,
        /// Pull request number to record
        #[arg(long)]
        pr: Option<i64>,
        /// Output document ID to record
        #[arg(long)]
        output_doc_id: Option<String>,
    },
    /// Update item fields
    Update {
        /// Work item ID
        id: String,
        /// New title
        #[arg(long)]
        title: Option<String>,
        /// New content
        #[arg(long)]
        content: Option<String>,
        /// New priority
        #[arg(long)]
        priority: Option<i64>,
        /// New item type label
        #[arg(long = "type")]
        item_type: Option<String>,
        /// New project label
        #[arg(long)]
        project: Option<String>,
        /// Pull request number
        #[arg(long)]
        pr: Option<i64>,
        /// Output document ID
        #[arg(long)]
        output_doc_id: Option<String>,
    },
    /// Delete a work item (its transition history is kept)
    Delete {
        /// Work item ID
        id: String,
    },
    /// Show an item's stage transition history
    History {
        /// Work item ID
        id: String,
    },
}

#[derive(Subcommand)]
enum DepAction {
    /// Add a dependency edge
    Add {
        /// Dependent work item ID
        work_id: String,
        /// Item it depends on
        depends_on: String,
        /// Edge type: blocks, related, or discovered-from
        #[arg(long = "type", default_value = "blocks")]
        dep_type: String,
    },
    /// Remove a dependency edge
    Rm {
        /// Dependent work item ID
        work_id: String,
        /// Item it depends on
        depends_on: String,
    },
    /// List an item's dependencies and dependents
    List {
        /// Work item ID
        id: String,
    },
}

#[derive(Subcommand)]
enum PatrolAction {
    /// Run the poll/claim/process loop until Ctrl-C
    Run {
        /// Patrol name, used as the claim identity
        #[arg(long, default_value = "patrol")]
        name: String,
        /// Only poll items in this cascade
        #[arg(long)]
        cascade: Option<String>,
        /// Only poll items in this stage
        #[arg(long)]
        stage: Option<String>,
        /// Seconds to sleep between empty polls
        #[arg(long, default_value_t = 10)]
        poll_interval: u64,
        /// Items fetched per poll
        #[arg(long, default_value_t = 1)]
        max_items: usize,
        /// Stop after this many loop iterations
        #[arg(long)]
        max_iterations: Option<u64>,
        /// Executor timeout in seconds for non-heavy stages
        #[arg(long, default_value_t = 300)]
        timeout: u64,
        /// Log what would run without invoking the executor
        #[arg(long)]
        dry_run: bool,
        /// Reclaim items whose claims are older than this many seconds
        #[arg(long)]
        claim_ttl: Option<u64>,
        /// Shell command to execute tasks with (task text on stdin)
        #[arg(long, env = "CASCADE_EXECUTOR_CMD")]
        executor_cmd: Option<String>,
    },
}

/// Parse a `key=value` CLI argument.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cascade_core=info,cascade_cli=info".into()),
        )
        .init();

    let state = commands::init_state(&cli.db);

    let result = match cli.command {
        Commands::Cascade { action } => match action {
            CascadeAction::Create {
                name,
                stages,
                processors,
                heavy,
                description,
            } => match commands::cascade::build_stages(&stages, &processors, &heavy) {
                Ok(built) => commands::cascade::create(&state, &name, built, description).await,
                Err(e) => Err(e),
            },
            CascadeAction::List => commands::cascade::list(&state).await,
            CascadeAction::Show { name } => commands::cascade::show(&state, &name).await,
            CascadeAction::Delete { name } => commands::cascade::delete(&state, &name).await,
        },

        Commands::Work { action } => match action {
            WorkAction::Add {
                title,
                cascade,
                stage,
                content,
                priority,
                item_type,
                parent_id,
                depends_on,
                project,
                created_by,
            } => {
                commands::work::add(
                    &state, &title, &cascade, stage, content, priority, item_type, parent_id,
                    depends_on, project, created_by,
                )
                .await
            }
            WorkAction::Get { id } => commands::work::get(&state, &id).await,
            WorkAction::List {
                cascade,
                stage,
                project,
                include_done,
                limit,
            } => {
                commands::work::list(
                    &state,
                    ListWorkFilter {
                        cascade,
                        stage,
                        project,
                        include_done,
                        limit,
                    },
                )
                .await
            }
            WorkAction::Ready {
                cascade,
                stage,
                project,
                limit,
            } => {
                commands::work::ready(
                    &state,
                    ListWorkFilter {
                        cascade,
                        stage,
                        project,
                        include_done: false,
                        limit,
                    },
                )
                .await
            }
            WorkAction::Advance { id, by, content } => {
                commands::work::advance(&state, &id, &by, content).await
            }
            WorkAction::SetStage {
                id,
                stage,
                by,
                content,
            } => commands::work::set_stage(&state, &id, &stage, &by, content).await,
            WorkAction::Claim { id, owner } => commands::work::claim(&state, &id, &owner).await,
            WorkAction::Release { id } => commands::work::release(&state, &id).await,
            WorkAction::Done {
                id,
                pr,
                output_doc_id,
            } => commands::work::done(&state, &id, pr, output_doc_id).await,
            WorkAction::Update {
                id,
                title,
                content,
                priority,
                item_type,
                project,
                pr,
                output_doc_id,
            } => {
                commands::work::update(
                    &state,
                    &id,
                    UpdateWorkInput {
                        title,
                        content,
                        priority,
                        item_type,
                        project,
                        pr_number: pr,
                        output_doc_id,
                    },
                )
                .await
            }
            WorkAction::Delete { id } => commands::work::delete(&state, &id).await,
            WorkAction::History { id } => commands::work::history(&state, &id).await,
        },

        Commands::Dep { action } => match action {
            DepAction::Add {
                work_id,
                depends_on,
                dep_type,
            } => commands::dep::add(&state, &work_id, &depends_on, &dep_type).await,
            DepAction::Rm {
                work_id,
                depends_on,
            } => commands::dep::remove(&state, &work_id, &depends_on).await,
            DepAction::List { id } => commands::dep::list(&state, &id).await,
        },

        Commands::Patrol { action } => match action {
            PatrolAction::Run {
                name,
                cascade,
                stage,
                poll_interval,
                max_items,
                max_iterations,
                timeout,
                dry_run,
                claim_ttl,
                executor_cmd,
            } => {
                let mut config = PatrolConfig::new(name);
                config.cascade = cascade;
                config.stage = stage;
                config.poll_interval = Duration::from_secs(poll_interval);
                config.max_items = max_items;
                config.max_iterations = max_iterations;
                config.timeout = Duration::from_secs(timeout);
                config.dry_run = dry_run;
                config.claim_ttl = claim_ttl.map(Duration::from_secs);
                commands::patrol::run(&state, config, executor_cmd).await
            }
        },

        Commands::Process {
            id,
            name,
            executor_cmd,
            timeout,
            dry_run,
        } => {
            let mut config = PatrolConfig::new(name);
            config.timeout = Duration::from_secs(timeout);
            config.dry_run = dry_run;
            commands::patrol::process(&state, &id, config, executor_cmd).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

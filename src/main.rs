use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};

mod commands;
mod config;
mod context;
mod engine;
mod errors;
mod forge;
mod git_gateway;
mod graph;
mod metadata;
mod naming;
mod snapshot;
mod state;
#[cfg(test)]
mod test_context;

use errors::Error;

#[derive(Parser)]
#[command(
    about = "stackit: manage stacked git branches",
    long_about = None,
    version,
    disable_help_subcommand = true,
    help_template = "\
{about}

{usage-heading} {usage}

Get Started:
  init        Initialize stackit in your repo
  create      Create a new stacked branch                [c]
  log         Visualize your stack                       [l]

Core Workflow:
  absorb      Absorb staged hunks into earlier commits
  submit      Push branches and create PRs               [s]
  merge       Merge the stack's PRs
  sync        Refresh trunk and prune merged branches

Navigate:
  checkout    Switch to a branch                         [co]
  up          Move to child branch                       [u]
  down        Move to parent branch                      [d]
  top         Jump to top of stack                       [t]
  bottom      Jump to bottom of stack                    [b]
  trunk       Show, set or jump to trunk

Manage Stack:
  restack     Rebase branches onto their parents
  move        Move branch to a new parent
  fold        Merge branch into parent                   [f]
  split       Split branch into multiple                 [sp]
  squash      Squash commits in branch                   [sq]
  reorder     Reorder the current stack
  delete      Delete a branch
  rename      Rename current branch
  pop         Delete branch, keep changes

Recovery:
  continue    Resume interrupted operation               [cont]
  abort       Cancel interrupted operation
  undo        Restore a pre-command snapshot
  doctor      Diagnose and repair metadata

Setup:
  track       Start tracking a branch
  untrack     Stop tracking a branch                     [utr]
  config      Configuration settings                     [cfg]
  scope       Show or set the branch's logical scope
  completion  Generate shell completions

Info:
  info        Show branch details
  parent      Show parent branch
  children    Show child branches
  debug       Dump engine state as JSON

Options:
  -v, --verbose  Show git commands being executed
  -n, --dry-run  Preview without executing
  -h, --help     Print help
  -V, --version  Print version

Run 'stackit <command> --help' for more information on a command.
"
)]
pub struct Cli {
    /// Show git commands being executed
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Preview destructive operations without executing them
    #[arg(short = 'n', long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize stackit in your repo
    Init {
        /// Trunk branch name (defaults to main/master if found)
        #[arg(long)]
        trunk: Option<String>,
        /// Reset stackit (untrack all branches and reinitialize)
        #[arg(long)]
        reset: bool,
    },
    /// Create a new stacked branch
    #[command(
        visible_alias = "c",
        after_help = "\
Examples:
  create feature           Create branch named 'feature'
  create -m \"Add login\"    Generate the name from the message
  create -am \"Fix bug\"     Stage all changes and commit"
    )]
    Create {
        /// Name of the new branch (generated from the message if omitted)
        name: Option<String>,
        /// Commit message
        #[arg(short = 'm', long)]
        message: Option<String>,
        /// Stage all changes before committing
        #[arg(short = 'a', long)]
        all: bool,
        /// Stage only updates to tracked files (like git add -u)
        #[arg(short = 'u', long)]
        update: bool,
        /// Logical scope for the new branch
        #[arg(long)]
        scope: Option<String>,
    },
    /// Visualize your stack
    #[command(visible_aliases = ["l", "ls"])]
    Log,
    /// Switch to a branch
    #[command(visible_alias = "co")]
    Checkout {
        /// Name of the branch to checkout
        name: String,
    },
    /// Move to child branch
    #[command(visible_alias = "u")]
    Up {
        /// Number of steps to move
        #[arg(default_value = "1")]
        steps: usize,
    },
    /// Move to parent branch
    #[command(visible_alias = "d")]
    Down {
        /// Number of steps to move
        #[arg(default_value = "1")]
        steps: usize,
    },
    /// Jump to top of stack
    #[command(visible_alias = "t")]
    Top,
    /// Jump to bottom of stack
    #[command(visible_alias = "b")]
    Bottom,
    /// Show, set or jump to the trunk branch
    Trunk {
        /// Set the trunk branch to this value
        #[arg(long, value_name = "BRANCH")]
        set: Option<String>,
        /// Checkout the trunk branch
        #[arg(long)]
        checkout: bool,
    },
    /// Show parent branch
    Parent,
    /// Show child branches
    Children,
    /// Show branch details
    Info {
        /// Branch to show info for (defaults to current)
        branch: Option<String>,
    },
    /// Rebase branches onto their parents
    Restack {
        /// Branch to start from (default: current branch)
        #[arg(short = 'b', long)]
        branch: Option<String>,
        /// Restack only this branch (no descendants)
        #[arg(long)]
        only: bool,
        /// Restack ancestors down to trunk
        #[arg(long, conflicts_with = "only")]
        downstack: bool,
        /// Restack branch and descendants (default)
        #[arg(long, conflicts_with_all = ["only", "downstack"])]
        upstack: bool,
    },
    /// Resume interrupted operation
    #[command(visible_alias = "cont")]
    Continue,
    /// Cancel interrupted operation
    Abort,
    /// Absorb staged hunks into the ancestor commits that introduced them
    Absorb {
        /// Stage all changes before absorbing
        #[arg(short = 'a', long)]
        all: bool,
        /// Proceed even when some hunks cannot be absorbed
        #[arg(short = 'f', long)]
        force: bool,
        /// Only consider already-staged entries
        #[arg(short = 'p', long)]
        patch: bool,
    },
    /// Squash commits in branch
    #[command(visible_alias = "sq")]
    Squash {
        /// Commit message for the squashed commit
        #[arg(short = 'm', long)]
        message: Option<String>,
    },
    /// Split branch into multiple
    #[command(
        visible_alias = "sp",
        after_help = "\
Examples:
  split --by-commit            Each commit becomes a branch
  split --by-file \"*.test.ts\"  Extract matching files below this branch
  split --by-hunk              Interactive hunk selection"
    )]
    Split {
        /// Split by commit - each commit becomes a branch
        #[arg(short = 'c', long = "by-commit", conflicts_with_all = ["by_file", "by_hunk"])]
        by_commit: bool,
        /// Split by file - extract files matching patterns
        #[arg(short = 'f', long = "by-file", num_args = 1.., conflicts_with_all = ["by_commit", "by_hunk"])]
        by_file: Option<Vec<String>>,
        /// Split by hunk - interactively select hunks (requires a TTY)
        #[arg(short = 'H', long = "by-hunk", conflicts_with_all = ["by_commit", "by_file"])]
        by_hunk: bool,
    },
    /// Merge branch into parent
    #[command(visible_alias = "f")]
    Fold {
        /// Keep the current branch's name instead of the parent's
        #[arg(short = 'k', long)]
        keep: bool,
    },
    /// Move branch to a new parent
    Move {
        /// Target parent branch
        #[arg(long)]
        onto: Option<String>,
        /// Branch to move (defaults to current branch)
        #[arg(long)]
        source: Option<String>,
    },
    /// Reorder the current stack
    Reorder {
        /// Read new order from file instead of opening an editor
        #[arg(long)]
        file: Option<String>,
        /// Show current order without editing
        #[arg(long)]
        preview: bool,
    },
    /// Delete a branch
    Delete {
        /// Branch name to delete (defaults to current)
        name: Option<String>,
        /// Force delete even if the branch is not merged
        #[arg(short = 'f', long)]
        force: bool,
    },
    /// Rename current branch
    Rename {
        /// New name for the branch
        name: String,
        /// Force rename even when a PR is open
        #[arg(short = 'f', long)]
        force: bool,
    },
    /// Delete branch, keep changes
    Pop,
    /// Push branches and create PRs
    #[command(
        visible_alias = "s",
        after_help = "\
Examples:
  submit                   Submit current branch
  submit --stack           Submit the entire stack
  submit -d                Create PRs as drafts"
    )]
    Submit {
        /// Submit the entire stack (ancestors and descendants)
        #[arg(long)]
        stack: bool,
        /// Create PRs as drafts
        #[arg(short = 'd', long)]
        draft: bool,
        /// Force push (instead of --force-with-lease)
        #[arg(short = 'f', long)]
        force: bool,
        /// Submit a specific branch (defaults to current)
        #[arg(short = 'b', long, value_name = "BRANCH")]
        branch: Option<String>,
    },
    /// Merge the stack's PRs
    Merge {
        /// Merge strategy: bottom-up or top-down
        #[arg(long, default_value = "bottom-up")]
        strategy: String,
        /// Proceed despite validation errors and warnings
        #[arg(short = 'f', long)]
        force: bool,
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
        /// Merge every branch tagged with this logical scope
        #[arg(long, value_name = "SCOPE")]
        scope: Option<String>,
        /// Restack survivors in a temporary worktree
        #[arg(long)]
        worktree: bool,
    },
    /// Refresh trunk from its remote and prune merged branches
    Sync {
        /// Sync all configured trunks
        #[arg(long)]
        all: bool,
        /// Proceed when trunk has diverged from its remote
        #[arg(short = 'f', long)]
        force: bool,
        /// Restack every stack after syncing
        #[arg(long)]
        restack: bool,
    },
    /// Restore a pre-command snapshot
    Undo {
        /// Snapshot id to restore (defaults to the most recent)
        #[arg(long, value_name = "ID")]
        snapshot: Option<u64>,
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
        /// Restore even with a dirty worktree
        #[arg(short = 'f', long)]
        force: bool,
        /// List available snapshots
        #[arg(long)]
        list: bool,
    },
    /// Diagnose and repair metadata
    Doctor {
        /// Automatically fix detected issues
        #[arg(long)]
        fix: bool,
    },
    /// Start tracking a branch
    Track {
        /// Branch name to track (defaults to current branch)
        branch: Option<String>,
        /// Parent branch for the tracked branch
        #[arg(short = 'p', long)]
        parent: Option<String>,
        /// Re-infer the parent from git history (repairs metadata)
        #[arg(short = 'f', long)]
        force: bool,
    },
    /// Stop tracking a branch
    #[command(visible_alias = "utr")]
    Untrack {
        /// Branch name to untrack (defaults to current branch)
        branch: Option<String>,
    },
    /// Configuration settings
    #[command(visible_alias = "cfg")]
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
    /// Show or set the current branch's logical scope
    Scope {
        /// Scope name to set
        name: Option<String>,
        /// Clear the branch's scope
        #[arg(long, conflicts_with = "name")]
        clear: bool,
    },
    /// Dump engine state as JSON (for bug reports)
    Debug,
    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// Show all configuration values
    List,
}

/// Point the user at continue/abort when interrupted mid-operation.
fn install_signal_handler() {
    let result = ctrlc::set_handler(|| {
        eprintln!("\n\nOperation interrupted. Run:");
        eprintln!("  stackit continue   to continue");
        eprintln!("  stackit abort      to rollback");
        std::process::exit(130);
    });
    if let Err(e) = result {
        eprintln!("Warning: could not install Ctrl-C handler: {}", e);
    }
}

#[tokio::main]
async fn main() {
    install_signal_handler();

    let matches = Cli::command().get_matches();
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    context::ExecutionContext::init(cli.verbose, cli.dry_run);
    let ctx = context::ExecutionContext::new(cli.verbose, cli.dry_run);

    let Some(command) = cli.command else {
        eprintln!("No command provided. Run 'stackit --help' for usage.");
        std::process::exit(1);
    };

    let result = context::with_context(ctx, dispatch(command)).await;

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(e.exit_code());
    }
}

async fn dispatch(command: Commands) -> Result<(), Error> {
    match command {
        Commands::Init { trunk, reset } => commands::init::run(trunk, reset),
        Commands::Create {
            name,
            message,
            all,
            update,
            scope,
        } => commands::create::run(name, message, all, update, scope),
        Commands::Log => commands::log::run(),
        Commands::Checkout { name } => commands::navigate::run_checkout(name),
        Commands::Up { steps } => commands::navigate::run_up(steps),
        Commands::Down { steps } => commands::navigate::run_down(steps),
        Commands::Top => commands::navigate::run_top(),
        Commands::Bottom => commands::navigate::run_bottom(),
        Commands::Trunk { set, checkout } => {
            if checkout {
                commands::navigate::run_trunk_checkout()
            } else {
                commands::info::run_trunk(set)
            }
        }
        Commands::Parent => commands::info::run_parent(),
        Commands::Children => commands::info::run_children(),
        Commands::Info { branch } => commands::info::run(branch),
        Commands::Restack {
            branch,
            only,
            downstack,
            upstack,
        } => commands::restack::run(branch, only, downstack, upstack),
        Commands::Continue => commands::continue_op::run(),
        Commands::Abort => commands::abort::run(),
        Commands::Absorb { all, force, patch } => commands::absorb::run(all, force, patch),
        Commands::Squash { message } => commands::squash::run(message),
        Commands::Split {
            by_commit,
            by_file,
            by_hunk,
        } => commands::split::run(by_commit, by_file, by_hunk),
        Commands::Fold { keep } => commands::fold::run(keep),
        Commands::Move { onto, source } => commands::move_cmd::run(onto, source),
        Commands::Reorder { file, preview } => commands::reorder::run(file, preview),
        Commands::Delete { name, force } => commands::delete::run(name, force),
        Commands::Rename { name, force } => commands::rename::run(name, force),
        Commands::Pop => commands::pop::run(),
        Commands::Submit {
            stack,
            draft,
            force,
            branch,
        } => commands::submit::run(stack, draft, force, branch).await,
        Commands::Merge {
            strategy,
            force,
            yes,
            scope,
            worktree,
        } => {
            let strategy = strategy.parse()?;
            commands::merge::run(strategy, force, yes, scope, worktree).await
        }
        Commands::Sync { all, force, restack } => commands::sync::run(all, force, restack).await,
        Commands::Undo {
            snapshot,
            yes,
            force,
            list,
        } => commands::undo::run(snapshot, yes, force, list),
        Commands::Doctor { fix } => commands::doctor::run(fix),
        Commands::Track {
            branch,
            parent,
            force,
        } => commands::track::run_track(branch, parent, force),
        Commands::Untrack { branch } => commands::track::run_untrack(branch),
        Commands::Config { action } => match action {
            Some(ConfigAction::Get { key }) => commands::config_cmd::get(&key),
            Some(ConfigAction::Set { key, value }) => commands::config_cmd::set(&key, &value),
            Some(ConfigAction::List) | None => commands::config_cmd::list(),
        },
        Commands::Scope { name, clear } => commands::scope::run(name, clear),
        Commands::Debug => commands::debug::run(),
        Commands::Completion { shell } => commands::completion::run(shell),
    }
}

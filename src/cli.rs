//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::task::TaskId;

/// doyaken - phase pipeline orchestrator for agent-driven tasks
#[derive(Parser)]
#[command(
    name = "dk",
    about = "Drives markdown tasks through an agent phase pipeline",
    version = env!("GIT_DESCRIBE"),
    after_help = "Logs are written to: ~/.local/share/doyaken/logs/doyaken.log"
)]
pub struct Cli {
    /// Config file replacing the global/project chain
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Show phase starts and raw agent output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Show final task outcomes only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Pull tasks from the queue and run them through the pipeline
    Run {
        /// How many tasks to process
        #[arg(value_name = "COUNT", default_value_t = 1)]
        count: usize,

        /// Run one specific task instead of pulling from the queue
        #[arg(short, long, value_name = "ID", conflicts_with = "count")]
        task: Option<TaskId>,

        /// Print what would run without claiming anything
        #[arg(long)]
        dry_run: bool,

        /// Model for every invocation, overriding config and checkpoints
        #[arg(short, long, value_name = "MODEL")]
        model: Option<String>,

        /// Agent command to invoke instead of the configured one
        #[arg(long, value_name = "CMD")]
        agent: Option<String>,
    },

    /// Show tasks in the store
    List {
        /// Lifecycle directory to show
        #[arg(value_name = "STATUS", default_value = "all")]
        scope: ListScope,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Create the .doyaken workspace skeleton and a commented manifest
    Init,
}

/// Which lifecycle directories `dk list` shows
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ListScope {
    Todo,
    Doing,
    Done,
    #[default]
    All,
}

impl std::str::FromStr for ListScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "todo" => Ok(Self::Todo),
            "doing" => Ok(Self::Doing),
            "done" => Ok(Self::Done),
            "all" => Ok(Self::All),
            _ => Err(format!("Unknown status: {s}. Use: todo, doing, done, or all")),
        }
    }
}

impl std::fmt::Display for ListScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Todo => write!(f, "todo"),
            Self::Doing => write!(f, "doing"),
            Self::Done => write!(f, "done"),
            Self::All => write!(f, "all"),
        }
    }
}

/// Output format for list
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {s}. Use: text or json")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_no_command() {
        let cli = Cli::parse_from(["dk"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_parse_run_defaults() {
        let cli = Cli::parse_from(["dk", "run"]);
        if let Some(Command::Run {
            count,
            task,
            dry_run,
            model,
            agent,
        }) = cli.command
        {
            assert_eq!(count, 1);
            assert!(task.is_none());
            assert!(!dry_run);
            assert!(model.is_none());
            assert!(agent.is_none());
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_cli_parse_run_count() {
        let cli = Cli::parse_from(["dk", "run", "3"]);
        assert!(matches!(cli.command, Some(Command::Run { count: 3, .. })));
    }

    #[test]
    fn test_cli_parse_run_task() {
        let cli = Cli::parse_from(["dk", "run", "--task", "001-002-ship-it"]);
        if let Some(Command::Run { task: Some(task), .. }) = cli.command {
            assert_eq!(task.to_string(), "001-002-ship-it");
        } else {
            panic!("Expected Run with task");
        }
    }

    #[test]
    fn test_cli_run_task_rejects_bad_id() {
        assert!(Cli::try_parse_from(["dk", "run", "--task", "not-a-task-id!"]).is_err());
    }

    #[test]
    fn test_cli_run_count_conflicts_with_task() {
        assert!(Cli::try_parse_from(["dk", "run", "3", "--task", "001-002-ship-it"]).is_err());
    }

    #[test]
    fn test_cli_parse_run_flags() {
        let cli = Cli::parse_from(["dk", "run", "--dry-run", "-m", "sonnet", "--agent", "mock-agent"]);
        if let Some(Command::Run {
            dry_run, model, agent, ..
        }) = cli.command
        {
            assert!(dry_run);
            assert_eq!(model.as_deref(), Some("sonnet"));
            assert_eq!(agent.as_deref(), Some("mock-agent"));
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_cli_parse_list_defaults() {
        let cli = Cli::parse_from(["dk", "list"]);
        assert!(matches!(
            cli.command,
            Some(Command::List {
                scope: ListScope::All,
                format: OutputFormat::Text,
            })
        ));
    }

    #[test]
    fn test_cli_parse_list_scope_and_format() {
        let cli = Cli::parse_from(["dk", "list", "doing", "--format", "json"]);
        assert!(matches!(
            cli.command,
            Some(Command::List {
                scope: ListScope::Doing,
                format: OutputFormat::Json,
            })
        ));
    }

    #[test]
    fn test_cli_parse_init() {
        let cli = Cli::parse_from(["dk", "init"]);
        assert!(matches!(cli.command, Some(Command::Init)));
    }

    #[test]
    fn test_cli_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["dk", "-v", "-q", "list"]).is_err());
    }

    #[test]
    fn test_cli_with_config() {
        let cli = Cli::parse_from(["dk", "-c", "/tmp/doyaken.yml", "list"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/doyaken.yml")));
    }

    #[test]
    fn test_list_scope_from_str() {
        assert!(matches!("todo".parse::<ListScope>(), Ok(ListScope::Todo)));
        assert!(matches!("ALL".parse::<ListScope>(), Ok(ListScope::All)));
        assert!("backlog".parse::<ListScope>().is_err());
    }
}

//! # HabitQuest
//!
//! A terminal client for HabitQuest: tasks and habits that earn XP, with
//! recurring tasks expanded into one instance per occurrence.
//!
//! ## Usage
//!
//! ### Interactive Mode (TUI)
//!
//! Run without arguments to open the day view:
//!
//! ```bash
//! habitquest
//! # or explicitly
//! habitquest ui
//! ```
//!
//! #### TUI Key Bindings
//!
//! **Day View**
//! *   `Space`: Toggle done
//! *   `e`: Edit title inline (`Enter` saves, `Esc` cancels)
//! *   `d`: Delete this instance
//! *   `[` / `]`: Previous / next day, `t`: back to today
//! *   `v`: Switch to the recurring view
//!
//! **Recurring View**
//! *   `e` / `d`: Edit or delete; `Tab` switches between this instance and
//!     this and all future instances
//!
//! ### Command Line Interface (CLI)
//!
//! ```bash
//! habitquest add "Meditate" --due 2024-03-01 --recur daily --until 2024-03-31 --habit
//! habitquest today
//! habitquest complete 7
//! habitquest edit 7 --title "Meditate 15 min" --all-future
//! habitquest remove 7 --all-future
//! ```
//!
//! ## Backends
//!
//! By default tasks live in a local file (`~/.local/share/habitquest/tasks.json`
//! on Linux, override with `HABITQUEST_DB`). Set `backend = "remote"` in
//! `config.toml`, pass `--api-url` or set `HABITQUEST_API_URL` to use a
//! HabitQuest server instead.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use tracing::error;

use habitquest::api;
use habitquest::commands::*;
use habitquest::config::{data_dir, Backend, Config};
use habitquest::logging;
use habitquest::models::{parse_day, TaskId};
use habitquest::store::TaskStore;
use habitquest::tui::run_tui;

#[derive(Parser)]
#[command(name = "habitquest")]
#[command(about = "Tasks, habits and recurring chores that earn XP", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/habitquest/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Use the local task file even if a server is configured
    #[arg(long, global = true, conflicts_with = "api_url")]
    local: bool,
    /// Talk to the HabitQuest server at this URL
    #[arg(long, global = true)]
    api_url: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new task
    Add {
        /// Task title (quoted if it has spaces)
        title: String,
        /// Due date, YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS
        #[arg(short, long)]
        due: String,
        #[arg(short = 'D', long)]
        description: Option<String>,
        /// XP awarded on completion (default 10)
        #[arg(short, long)]
        xp: Option<u32>,
        /// Mark as a habit
        #[arg(long)]
        habit: bool,
        /// Repeat daily, weekly, biweekly or monthly
        #[arg(short, long)]
        recur: Option<String>,
        /// Last day an instance may fall on
        #[arg(short, long, requires = "recur")]
        until: Option<String>,
    },
    /// List tasks
    List {
        /// Only tasks due on this day (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<String>,
        /// Show completed tasks
        #[arg(short, long)]
        all: bool,
    },
    /// List tasks due today
    Today {
        /// Show completed tasks
        #[arg(short, long)]
        all: bool,
    },
    /// List recurring tasks, one row per series
    Recurring,
    /// Toggle a task instance done / open
    Complete { id: String },
    /// Edit a task
    Edit {
        id: String,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(short = 'D', long)]
        description: Option<String>,
        #[arg(short, long)]
        due: Option<String>,
        #[arg(short, long)]
        xp: Option<u32>,
        /// New frequency (recurring tasks only)
        #[arg(short, long)]
        recur: Option<String>,
        /// New end date (recurring tasks only)
        #[arg(short, long)]
        until: Option<String>,
        /// Apply to this and all future instances
        #[arg(long)]
        all_future: bool,
    },
    /// Remove a task
    Remove {
        id: String,
        /// Also remove all future instances
        #[arg(long)]
        all_future: bool,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
    /// Open interactive TUI
    Ui,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Commands::Ui);
    if let Commands::Completions { shell } = command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "habitquest", &mut io::stdout());
        return ExitCode::SUCCESS;
    }

    if matches!(command, Commands::Ui) {
        logging::init_file(&data_dir().join("habitquest.log"));
    } else {
        logging::init_stderr();
    }

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(url) = cli.api_url {
        config.api_url = url;
        config.backend = Backend::Remote;
    }
    if cli.local {
        config.backend = Backend::Local;
    }

    let backend = match api::from_config(&config) {
        Ok(backend) => backend,
        Err(e) => {
            error!("Failed to open backend: {}", e);
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut store = TaskStore::new(backend);

    let res = match command {
        Commands::Add {
            title,
            due,
            description,
            xp,
            habit,
            recur,
            until,
        } => {
            let args = AddArgs {
                title,
                due,
                description,
                xp,
                habit,
                recur,
                until,
            };
            cmd_add(&mut store, args).await
        }
        Commands::List { date, all } => match date.as_deref().map(parse_day).transpose() {
            Ok(date) => cmd_list(&mut store, date, all).await,
            Err(e) => Err(e.into()),
        },
        Commands::Today { all } => cmd_today(&mut store, all).await,
        Commands::Recurring => cmd_recurring(&mut store).await,
        Commands::Complete { id } => cmd_complete(&mut store, TaskId::new(id)).await,
        Commands::Edit {
            id,
            title,
            description,
            due,
            xp,
            recur,
            until,
            all_future,
        } => {
            let args = EditArgs {
                title,
                description,
                due,
                xp,
                recur,
                until,
                all_future,
            };
            cmd_edit(&mut store, TaskId::new(id), args).await
        }
        Commands::Remove { id, all_future, force } => {
            cmd_remove(&mut store, TaskId::new(id), all_future, force).await
        }
        Commands::Ui | Commands::Completions { .. } => {
            let refresh = Duration::from_secs(config.refresh_interval_secs.max(1));
            if let Err(e) = run_tui(&mut store, refresh).await {
                eprintln!("Error running TUI: {}", e);
                return ExitCode::FAILURE;
            }
            return ExitCode::SUCCESS;
        }
    };

    let reported = flush_notices(&mut store);
    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // the store already explained most failures
            if reported == 0 {
                eprintln!("Error: {e}");
            }
            ExitCode::FAILURE
        }
    }
}

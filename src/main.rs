use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use lrm_sync::backend::JsonBackend;
use lrm_sync::config::ProjectPaths;
use lrm_sync::conflict::ResolutionStrategy;
use lrm_sync::handlers::{self, CommandStatus};
use lrm_sync::logger;
use lrm_sync::sync::{PullOptions, PushOptions, SyncClient};

#[derive(Parser)]
#[command(name = "lrm-sync")]
#[command(about = "Versioned backups and cloud sync for localization resource files", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create lrm.toml and the .lrm state directory here
    Init {
        /// Remote URL (https://... or file:<path>)
        #[arg(short, long)]
        remote: Option<String>,

        /// Directory holding the language files
        #[arg(long)]
        resource_dir: Option<String>,
    },

    /// Show local changes since the last sync
    Status {
        /// Limit to these files or directories
        paths: Vec<String>,
    },

    /// Upload local changes
    Push {
        /// Limit to these files or directories
        paths: Vec<String>,

        #[arg(short, long)]
        message: Option<String>,

        /// Show what would be uploaded without uploading
        #[arg(long)]
        dry_run: bool,

        /// Skip conflict detection and the remote version check
        #[arg(long)]
        force: bool,

        #[arg(long, conflicts_with = "resources_only")]
        config_only: bool,

        #[arg(long)]
        resources_only: bool,
    },

    /// Download remote changes
    ///
    /// lrm.toml is synced like a resource file. On the first pull into a
    /// project whose lrm.toml differs from the remote copy there is no common
    /// base, so the difference is a configuration conflict: pass
    /// --resources-only, or pick a side with --strategy local/remote.
    Pull {
        /// Limit to these files or directories
        paths: Vec<String>,

        /// Conflict strategy: local, remote, prompt or abort
        #[arg(short, long)]
        strategy: Option<String>,

        /// Show what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Take the remote side of every conflict
        #[arg(long)]
        force: bool,

        /// Do not back up files before overwriting them
        #[arg(long)]
        no_backup: bool,

        #[arg(long, conflicts_with = "resources_only")]
        config_only: bool,

        #[arg(long)]
        resources_only: bool,

        /// Only pull entries in this workflow state
        #[arg(long)]
        status_filter: Option<String>,
    },

    /// Local file versions
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Show the remote push history
    Log {
        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = 20)]
        page_size: usize,

        #[arg(long)]
        oneline: bool,
    },

    /// Show one history entry
    Show { id: String },

    /// Revert a history entry on the remote
    Revert {
        id: String,

        #[arg(short, long)]
        message: Option<String>,

        /// Show what would change without reverting
        #[arg(long)]
        dry_run: bool,
    },

    /// Remote project snapshots
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
}

#[derive(Subcommand)]
enum BackupAction {
    /// Back up the current content of a file
    Create { file: PathBuf },

    /// List versions of a file, or every backed-up file
    List { file: Option<PathBuf> },

    /// Restore a version, fully or for selected keys
    Restore {
        file: PathBuf,
        version: u32,

        /// Restore only these keys
        #[arg(short, long)]
        key: Vec<String>,

        /// Do not back up the current file first
        #[arg(long)]
        no_backup: bool,
    },

    /// Compare a version with another version or the current file
    Diff {
        file: PathBuf,
        version: u32,
        against: Option<u32>,
    },

    /// Show details of one version
    Info { file: PathBuf, version: u32 },

    /// Remove old versions
    Prune {
        /// Prune only this file
        file: Option<PathBuf>,

        /// Versions to keep (default: [backup] retention)
        #[arg(long)]
        keep: Option<usize>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Put back the files the last pull overwrote
    UndoPull {
        /// Archive to restore (default: the newest)
        archive: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum SnapshotAction {
    Create {
        #[arg(short, long)]
        message: Option<String>,
    },
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = 20)]
        page_size: usize,
    },
    Show { id: String },
    /// Write a snapshot into the working copy
    Restore { id: String },
    Delete { id: String },
    Diff { from: String, to: String },
}

fn absolute(cwd: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        cwd.join(file)
    }
}

fn client(cwd: &Path) -> Result<SyncClient> {
    handlers::open_client(handlers::open_context(cwd)?)
}

fn run_backup(action: BackupAction, cwd: &Path) -> Result<CommandStatus> {
    let ctx = handlers::open_context(cwd)?;
    let store = ctx.version_store(Arc::new(JsonBackend));
    let actor = ctx.actor.clone();

    match action {
        BackupAction::Create { file } => {
            handlers::handle_backup_create(&store, &absolute(cwd, &file), &actor)
        }
        BackupAction::List { file } => {
            let file = file.map(|f| absolute(cwd, &f));
            handlers::handle_backup_list(&store, file.as_deref())
        }
        BackupAction::Restore {
            file,
            version,
            key,
            no_backup,
        } => handlers::handle_backup_restore(
            &store,
            &absolute(cwd, &file),
            version,
            &key,
            no_backup,
            &actor,
        ),
        BackupAction::Diff {
            file,
            version,
            against,
        } => handlers::handle_backup_diff(&store, &absolute(cwd, &file), version, against),
        BackupAction::Info { file, version } => {
            handlers::handle_backup_info(&store, &absolute(cwd, &file), version)
        }
        BackupAction::Prune {
            file,
            keep,
            dry_run,
        } => {
            let file = file.map(|f| absolute(cwd, &f));
            handlers::handle_backup_prune(&store, file.as_deref(), keep, dry_run)
        }
        BackupAction::UndoPull { archive } => {
            let archive = archive.map(|a| absolute(cwd, &a));
            handlers::handle_undo_pull(&ctx.paths, &store, archive.as_deref(), &actor)
        }
    }
}

fn run_snapshot(action: SnapshotAction, cwd: &Path) -> Result<CommandStatus> {
    let client = client(cwd)?;
    match action {
        SnapshotAction::Create { message } => {
            handlers::handle_snapshot_create(&client, message.as_deref())
        }
        SnapshotAction::List { page, page_size } => {
            handlers::handle_snapshot_list(&client, page, page_size)
        }
        SnapshotAction::Show { id } => handlers::handle_snapshot_show(&client, &id),
        SnapshotAction::Restore { id } => handlers::handle_snapshot_restore(&client, &id),
        SnapshotAction::Delete { id } => handlers::handle_snapshot_delete(&client, &id),
        SnapshotAction::Diff { from, to } => handlers::handle_snapshot_diff(&client, &from, &to),
    }
}

fn run(cli: Cli, cwd: &Path) -> Result<CommandStatus> {
    match cli.command {
        Commands::Init {
            remote,
            resource_dir,
        } => handlers::handle_init(cwd, remote, resource_dir),
        Commands::Status { paths } => handlers::handle_status(&client(cwd)?, &paths),
        Commands::Push {
            paths,
            message,
            dry_run,
            force,
            config_only,
            resources_only,
        } => handlers::handle_push(
            &client(cwd)?,
            &PushOptions {
                paths,
                dry_run,
                force,
                config_only,
                resources_only,
                message,
            },
        ),
        Commands::Pull {
            paths,
            strategy,
            dry_run,
            force,
            no_backup,
            config_only,
            resources_only,
            status_filter,
        } => {
            let strategy = strategy
                .as_deref()
                .map(str::parse::<ResolutionStrategy>)
                .transpose()?;
            handlers::handle_pull(
                &client(cwd)?,
                &PullOptions {
                    paths,
                    dry_run,
                    force,
                    no_backup,
                    strategy,
                    config_only,
                    resources_only,
                    status_filter,
                },
            )
        }
        Commands::Backup { action } => run_backup(action, cwd),
        Commands::Log {
            page,
            page_size,
            oneline,
        } => handlers::handle_log(&client(cwd)?.history(), page, page_size, oneline),
        Commands::Show { id } => handlers::handle_show(&client(cwd)?.history(), &id),
        Commands::Revert {
            id,
            message,
            dry_run,
        } => {
            let client = client(cwd)?;
            handlers::handle_revert(
                &client.history(),
                &id,
                message.as_deref(),
                &client.context().actor,
                dry_run,
            )
        }
        Commands::Snapshot { action } => run_snapshot(action, cwd),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let project = ProjectPaths::discover(&cwd).ok();
    if let Err(e) = logger::init_logger(project.as_ref()) {
        eprintln!("{} failed to set up logging: {:#}", "Warning:".yellow(), e);
    }
    if let Some(paths) = &project {
        let args: Vec<String> = std::env::args().skip(1).collect();
        if let Err(e) = logger::log_to_file(paths, &format!("lrm-sync {}", args.join(" "))) {
            log::debug!("File logging unavailable: {:#}", e);
        }
    }

    match run(cli, &cwd) {
        Ok(status) => ExitCode::from(status.exit_code()),
        Err(e) => {
            if let Some(paths) = &project {
                let _ = logger::log_to_file(paths, &format!("error: {e:#}"));
            }
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

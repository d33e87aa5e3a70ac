use anyhow::Result;
use clap::{CommandFactory, Parser};
use color_eyre::config::HookBuilder;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod handlers;
mod wizard;

use handlers::Context;

/// sppilot - SharePoint files from your terminal
#[derive(Parser, Debug)]
#[command(name = "sppilot")]
#[command(version)]
#[command(about = "List, download and copy SharePoint files with an app-only principal", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.config/sppilot/config.toml)
    #[arg(long, global = true, env = "SPPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Site profile to use (default: default_site from the configuration)
    #[arg(short, long, global = true, env = "SPPILOT_SITE")]
    site: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Initial setup (interactive wizard)
    Init,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Configured site profiles
    Sites {
        #[command(subcommand)]
        action: SiteAction,
    },

    /// File operations
    Files {
        #[command(subcommand)]
        action: FileAction,
    },

    /// Folder operations
    Folders {
        #[command(subcommand)]
        action: FolderAction,
    },

    /// Shell completion
    Completion {
        /// Shell type (bash, zsh, fish, elvish, powershell)
        shell: String,
    },

    /// Diagnostics
    Doctor {
        #[command(subcommand)]
        action: DoctorAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Show the current configuration
    Show,
    /// Edit the configuration in $EDITOR
    Edit,
    /// Validate the configuration and the site credentials
    Validate,
    /// Print the configuration file path
    Path,
}

#[derive(clap::Subcommand, Debug)]
enum SiteAction {
    /// List configured sites
    List,
}

#[derive(clap::Subcommand, Debug)]
enum FileAction {
    /// List files under a folder
    Ls {
        /// Folder, site-relative (/Shared Documents/Reports) or server-relative
        folder: String,
        /// Direct children only
        #[arg(long)]
        flat_only: bool,
        /// Deepest folder level to enter
        #[arg(long)]
        max_depth: Option<usize>,
        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        output: String,
    },
    /// Download a single file
    Download {
        /// Remote file path
        path: String,
        /// Local destination file
        dest: PathBuf,
    },
    /// Copy every file under a folder to a local directory
    Copy {
        /// Remote folder
        folder: String,
        /// Local destination directory
        dest: PathBuf,
        /// Put every file directly under the destination
        #[arg(long)]
        flatten: bool,
        /// Parallel downloads (default: max_concurrent_downloads)
        #[arg(short, long)]
        concurrency: Option<usize>,
        /// Deepest folder level to enter
        #[arg(long)]
        max_depth: Option<usize>,
    },
    /// Move a file into another folder on the site
    Move {
        /// Remote file path
        file: String,
        /// Target folder, created when missing
        target: String,
        /// Fail instead of replacing an existing file
        #[arg(long)]
        no_overwrite: bool,
    },
}

#[derive(clap::Subcommand, Debug)]
enum FolderAction {
    /// Check whether a folder exists
    Exists { folder: String },
    /// Create a folder
    Create { folder: String },
}

#[derive(clap::Subcommand, Debug)]
enum DoctorAction {
    /// Check the installation and configuration
    Check,
    /// Test authentication against the site
    TestConnection,
}

/// Install the tracing subscriber: `RUST_LOG` wins, then `-v`, then the
/// configured level.
fn init_logging(ctx: &Context, verbose: bool) {
    let logging = ctx.logging_config();
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match logging.format.as_str() {
        "compact" => builder.compact().try_init(),
        _ => builder.pretty().try_init(),
    };
    if let Err(e) = installed {
        eprintln!("Warning: Failed to install logger: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup error handling
    if let Err(e) = HookBuilder::default().install() {
        eprintln!("Warning: Failed to install error handler: {}", e);
    }

    // Parse CLI arguments
    let cli = Cli::parse();
    let ctx = Context::new(cli.config, cli.site);
    init_logging(&ctx, cli.verbose);

    // Execute command
    match cli.command {
        Commands::Init => handlers::handle_init(&ctx).await,
        Commands::Config { action } => {
            let action_str = match action {
                ConfigAction::Show => "show",
                ConfigAction::Edit => "edit",
                ConfigAction::Validate => "validate",
                ConfigAction::Path => "path",
            };
            handlers::handle_config(&ctx, action_str).await
        }
        Commands::Sites { action } => match action {
            SiteAction::List => handlers::handle_sites(&ctx, "list").await,
        },
        Commands::Files { action } => match action {
            FileAction::Ls {
                folder,
                flat_only,
                max_depth,
                output,
            } => handlers::handle_ls(&ctx, &folder, !flat_only, max_depth, &output).await,
            FileAction::Download { path, dest } => {
                handlers::handle_download(&ctx, &path, &dest).await
            }
            FileAction::Copy {
                folder,
                dest,
                flatten,
                concurrency,
                max_depth,
            } => handlers::handle_copy(&ctx, &folder, &dest, flatten, concurrency, max_depth).await,
            FileAction::Move {
                file,
                target,
                no_overwrite,
            } => handlers::handle_move(&ctx, &file, &target, !no_overwrite).await,
        },
        Commands::Folders { action } => {
            let (action_str, folder) = match action {
                FolderAction::Exists { folder } => ("exists", folder),
                FolderAction::Create { folder } => ("create", folder),
            };
            handlers::handle_folders(&ctx, action_str, &folder).await
        }
        Commands::Completion { shell } => {
            handlers::handle_completion(&shell, &mut Cli::command()).await
        }
        Commands::Doctor { action } => {
            let action_str = match action {
                DoctorAction::Check => "check",
                DoctorAction::TestConnection => "test-connection",
            };
            handlers::handle_doctor(&ctx, action_str).await
        }
    }
}

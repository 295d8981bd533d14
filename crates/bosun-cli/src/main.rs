mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{Context, EXIT_FAILURE, EXIT_STORE_ERROR, EXIT_VALIDATION_ERROR};
use bosun_core::install_signal_handler;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "bosun",
    version,
    about = "Install, configure, and keep running a catalog of containerized apps"
)]
struct Cli {
    /// Path to the bosun configuration file [env: BOSUN_CONFIG].
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the state directory from the configuration file.
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Lifecycle hooks, invoked by the service manager around container start/stop.
    Configure {
        #[command(subcommand)]
        hook: ConfigureCommand,
    },
    /// Install an app from the catalog.
    Install {
        /// App name as listed in the catalog.
        app: String,
        /// Integration choice, e.g. `--with downloadClient=qbittorrent`. Repeatable.
        #[arg(long = "with", value_name = "KEY=PROVIDER")]
        with: Vec<String>,
    },
    /// Uninstall an app and delete its secrets.
    Uninstall {
        /// App name.
        app: String,
    },
    /// List installed apps.
    List {
        /// Include infrastructure apps.
        #[arg(long, default_value_t = false)]
        all: bool,
    },
    /// Show an app's record, catalog entry, and container.
    Inspect {
        /// App name.
        app: String,
    },
    /// Show what the next configuration apply would change.
    Plan,
    /// Regenerate and apply the declarative configuration from current records.
    Generate,
    /// Secret store maintenance.
    Secrets {
        #[command(subcommand)]
        command: SecretsCommand,
    },
    /// Show recent install, uninstall, and reconcile attempts.
    History {
        /// Only attempts for this app.
        #[arg(long)]
        app: Option<String>,
        /// Number of attempts to show, newest last.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
        /// Write the script into this directory instead of stdout.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigureCommand {
    /// Before the container starts.
    Prestart { app: String },
    /// After the container starts: health check, then configuration.
    Poststart { app: String },
    /// After the container stopped.
    Poststop { app: String },
    /// Re-run prestart and poststart for every installed app.
    Reconcile,
}

#[derive(Debug, Subcommand)]
enum SecretsCommand {
    /// Rewrite every env file from the secret bundle.
    Render,
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("BOSUN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    let result = match cli.command {
        Commands::Completions { shell, dir } => {
            commands::completions::run::<Cli>(shell, dir.as_deref())
        }
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
        command => Context::load(cli.config.as_deref(), cli.state_dir, cli.json)
            .and_then(|ctx| dispatch(&ctx, command)),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with(commands::CATALOG_PREFIX)
                || msg.starts_with(commands::INVALID_PREFIX)
            {
                EXIT_VALIDATION_ERROR
            } else if msg.starts_with("store error:") || msg.starts_with("store lock:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn dispatch(ctx: &Context, command: Commands) -> Result<u8, String> {
    match command {
        Commands::Configure { hook } => match hook {
            ConfigureCommand::Prestart { app } => {
                commands::configure::hook(ctx, bosun_core::HookKind::PreStart, &app)
            }
            ConfigureCommand::Poststart { app } => {
                commands::configure::hook(ctx, bosun_core::HookKind::PostStart, &app)
            }
            ConfigureCommand::Poststop { app } => {
                commands::configure::hook(ctx, bosun_core::HookKind::PostStop, &app)
            }
            ConfigureCommand::Reconcile => commands::configure::reconcile(ctx),
        },
        Commands::Install { app, with } => commands::install::run(ctx, &app, &with),
        Commands::Uninstall { app } => commands::uninstall::run(ctx, &app),
        Commands::List { all } => commands::list::run(ctx, all),
        Commands::Inspect { app } => commands::inspect::run(ctx, &app),
        Commands::Plan => commands::plan::run(ctx),
        Commands::Generate => commands::generate::run(ctx),
        Commands::Secrets {
            command: SecretsCommand::Render,
        } => commands::secrets::render(ctx),
        Commands::History { app, limit } => commands::history::run(ctx, app.as_deref(), limit),
        Commands::Completions { .. } | Commands::ManPages { .. } => Ok(commands::EXIT_SUCCESS),
    }
}

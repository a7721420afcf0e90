use std::env;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::{LevelFilter, debug, error, info};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use runlet::api::{self, AppState};
use runlet::auth::{Fingerprint, IdentityResolver};
use runlet::config::{self, APP_NAME, AppConfig};
use runlet::process::Manager;
use runlet::{server, tls};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_serve(ctx: RuntimeContext, cmd: ServeCommand) -> Result<()> {
    handle_serve(&ctx, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.common);

    let create_config = matches!(cli.command, Command::Serve(_));
    let ctx = RuntimeContext::new(cli.common, create_config)?;
    debug!("resolved config file: {}", ctx.config_file.display());

    match cli.command {
        Command::Serve(cmd) => async_serve(ctx, cmd),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Fingerprint { cert } => handle_fingerprint(&ctx, &cert),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Runlet - run commands on this host for mutually authenticated clients.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Log more (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,
    /// Disable ANSI colors in log output
    #[arg(long = "no-color", global = true)]
    no_color: bool,
    /// Print command output (config show, fingerprint) as JSON
    #[arg(long, global = true)]
    json: bool,
    /// Do not change anything on disk
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,
}

impl CommonOpts {
    fn log_level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Error;
        }
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

/// Install the log subscriber. Runs before the config file is touched so
/// that messages about creating it are not lost.
fn init_logging(common: &CommonOpts) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = common.log_level();
    let filter = level.as_str().to_ascii_lowercase();
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("runlet={filter},tower_http={filter}")));

    match common.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .ok();
        }
        LogFormat::Pretty => {
            let ansi = !common.no_color
                && env::var_os("NO_COLOR").is_none()
                && io::stderr().is_terminal();
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(ansi)
                        .with_writer(io::stderr),
                )
                .try_init()
                .ok();
        }
    }

    // log crate users fall through to env_logger if no tracing bridge is installed
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.filter_level(level);
    builder.try_init().ok();
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the mutual-TLS API server
    Serve(ServeCommand),
    /// Create the config directory and default file
    Init(InitCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print the SHA-256 fingerprint of a client certificate
    Fingerprint {
        /// PEM certificate file
        #[arg(value_name = "CERT")]
        cert: PathBuf,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to (overrides server.host)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides server.port)
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Regenerate the default configuration file
    Reset,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    config_file: PathBuf,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts, create_if_missing: bool) -> Result<Self> {
        let config_file = config::resolve_config_file(common.config.as_deref())?;

        if create_if_missing && !config_file.exists() {
            if common.dry_run {
                info!(
                    "dry-run: would create default config at {}",
                    config_file.display()
                );
            } else {
                config::write_default_config(&config_file)?;
            }
        }

        let config = config::load_config(&config_file)?;
        Ok(Self {
            common,
            config_file,
            config,
        })
    }
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.config_file.exists() && !cmd.force {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.config_file.display()
        ));
    }

    if ctx.common.dry_run {
        info!(
            "dry-run: would write default config to {}",
            ctx.config_file.display()
        );
        return Ok(());
    }

    config::write_default_config(&ctx.config_file)?;
    println!("{}", ctx.config_file.display());
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else {
                print!(
                    "{}",
                    toml::to_string_pretty(&ctx.config).context("serializing config to TOML")?
                );
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                info!("dry-run: would reset config at {}", ctx.config_file.display());
                return Ok(());
            }
            config::write_default_config(&ctx.config_file)
        }
    }
}

fn handle_fingerprint(ctx: &RuntimeContext, path: &Path) -> Result<()> {
    let cert = tls::load_certificate(path)?;
    let fingerprint = Fingerprint::of(cert.as_ref());

    if ctx.common.json {
        println!(
            "{}",
            serde_json::json!({
                "path": path.display().to_string(),
                "fingerprint": fingerprint.to_string(),
            })
        );
    } else {
        println!("{fingerprint}  {}", path.display());
    }
    Ok(())
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    info!("Starting runlet server...");

    let identity = IdentityResolver::from_bindings(&ctx.config.users)
        .context("loading client certificates")?;
    if identity.is_empty() {
        return Err(anyhow!(
            "no users configured; add [[users]] entries to {}",
            ctx.config_file.display()
        ));
    }

    let manager = Manager::new(ctx.config.process.clone());
    for user in identity.users() {
        manager.add_user(user);
    }
    info!(
        "Provisioned {} users from {} client certificates",
        manager.user_count(),
        identity.len()
    );

    let tls_config = tls::server_config(&ctx.config.tls, identity.trusted_certificates())
        .context("configuring TLS")?;

    let state = AppState::new(Arc::new(manager), Arc::new(identity));
    let router = api::create_router(state);

    let host = cmd.host.unwrap_or_else(|| ctx.config.server.host.clone());
    let port = cmd.port.unwrap_or(ctx.config.server.port);
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("binding to {host}:{port}"))?;

    server::serve(
        listener,
        TlsAcceptor::from(tls_config),
        router,
        shutdown_signal(),
    )
    .await
    .context("running server")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

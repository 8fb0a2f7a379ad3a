use std::env;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use log::{LevelFilter, debug, info, warn};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use sessionlink::{Binding, ClientConfig, LinkClient, SessionBinder, TransportEvent};

const APP_NAME: &str = "sessionlink";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_watch(ctx: RuntimeContext) -> Result<()> {
    handle_watch(&ctx).await
}

#[tokio::main]
async fn async_link(ctx: RuntimeContext, cmd: LinkCommand) -> Result<()> {
    handle_link(&ctx, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Completions { shell } = cli.command {
        return handle_completions(shell);
    }

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging();
    debug!("config file: {}", ctx.config_file.display());

    match cli.command {
        Command::Watch => async_watch(ctx),
        Command::Link(cmd) => async_link(ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { .. } => unreachable!("handled before loading config"),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Sessionlink - realtime session binding diagnostics.",
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
    /// Config file (or directory holding config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Only log errors
    #[arg(short, long, global = true, conflicts_with_all = ["verbose", "debug", "trace"])]
    quiet: bool,
    /// More log output; repeat for trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,
    /// Log at trace level
    #[arg(long, global = true)]
    trace: bool,
    /// Print bindings and logs as JSON
    #[arg(long, global = true)]
    json: bool,
    /// Never color log output
    #[arg(long = "no-color", global = true)]
    no_color: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect, link, and print every binding change until Ctrl-C
    Watch,
    /// Perform one session link handshake for a connection id
    Link(LinkCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct LinkCommand {
    /// Connection id assigned by the realtime transport
    #[arg(value_name = "SOCKET_ID")]
    socket_id: String,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    config_file: PathBuf,
    config: ClientConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let config_file = discover_config_file(common.config.clone())?;
        let config = ClientConfig::load(Some(config_file.as_path()))
            .with_context(|| format!("loading config from {}", config_file.display()))?;
        Ok(Self {
            common,
            config_file,
            config,
        })
    }

    fn init_logging(&self) {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        let level = self.log_level();
        let directive = format!("{APP_NAME}={}", level.as_str().to_ascii_lowercase());
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
        let layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

        let installed = if self.common.json {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.json())
                .try_init()
        } else {
            let ansi = !self.common.no_color
                && env::var_os("NO_COLOR").is_none()
                && io::stderr().is_terminal();
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.with_ansi(ansi).with_target(false))
                .try_init()
        };

        // The registry forwards `log` records; env_logger only steps in when
        // another subscriber already owns the global slot.
        if installed.is_err() {
            env_logger::Builder::new()
                .filter_module(APP_NAME, level)
                .try_init()
                .ok();
        }
    }

    /// Level for this crate's logs: flags first, then `logging.level`.
    fn log_level(&self) -> LevelFilter {
        let common = &self.common;
        if common.quiet {
            return LevelFilter::Error;
        }
        if common.trace || common.verbose >= 2 {
            return LevelFilter::Trace;
        }
        if common.debug || common.verbose == 1 {
            return LevelFilter::Debug;
        }
        self.config
            .logging
            .level
            .parse()
            .unwrap_or(LevelFilter::Info)
    }
}

async fn handle_watch(ctx: &RuntimeContext) -> Result<()> {
    let binder = SessionBinder::from_config(&ctx.config).context("building session binder")?;

    let json = ctx.common.json;
    let _subscription = binder.subscribe(move |binding| print_binding(binding.as_ref(), json));

    tracing::info!(url = %ctx.config.websocket_url(), "watching realtime binding");
    binder.start();

    let mut messages = binder.messages();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = messages.recv() => match received {
                Ok(TransportEvent::Message { event, args }) => {
                    debug!("event {}: {}", event, serde_json::Value::Array(args));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Skipped {} realtime events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("Stopping");
    binder.stop();
    Ok(())
}

fn print_binding(binding: Option<&Binding>, json: bool) {
    let line = match (binding, json) {
        (Some(b), true) => json!({
            "connectionId": b.connection_id,
            "sessionIndex": b.session_index,
            "generation": b.generation,
        })
        .to_string(),
        (None, true) => "null".to_string(),
        (Some(b), false) => format!(
            "linked: connection {} -> session index {} (generation {})",
            b.connection_id, b.session_index, b.generation
        ),
        (None, false) => "unlinked".to_string(),
    };
    println!("{line}");
}

async fn handle_link(ctx: &RuntimeContext, cmd: LinkCommand) -> Result<()> {
    let client = LinkClient::from_config(&ctx.config).context("building link client")?;
    let index = client
        .link(&cmd.socket_id)
        .await
        .with_context(|| format!("linking {} via {}", cmd.socket_id, client.url()))?;

    if ctx.common.json {
        println!("{}", json!({ "socketIndex": index }));
    } else {
        println!("{index}");
    }
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
        ConfigCommand::Init { force } => {
            if ctx.config_file.exists() && !force {
                return Err(anyhow!(
                    "config already exists at {} (use --force to overwrite)",
                    ctx.config_file.display()
                ));
            }
            write_default_config(&ctx.config_file)?;
            info!("Wrote default config to {}", ctx.config_file.display());
            Ok(())
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

fn discover_config_file(override_path: Option<PathBuf>) -> Result<PathBuf> {
    let config_file = match override_path {
        Some(path) => {
            let expanded = expand_path(path)?;
            if expanded.is_dir() {
                expanded.join("config.toml")
            } else {
                expanded
            }
        }
        None => default_config_dir()?.join("config.toml"),
    };

    if config_file.parent().is_none() {
        return Err(anyhow!("invalid config file path: {config_file:?}"));
    }
    Ok(config_file)
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let toml = ClientConfig::default_toml().context("serializing default config to TOML")?;
    let mut body = String::new();
    body.push_str("# Configuration for ");
    body.push_str(APP_NAME);
    body.push('\n');
    body.push_str("# File: ");
    body.push_str(&path.display().to_string());
    body.push_str("\n\n");
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    let Some(text) = path.to_str() else {
        return Ok(path);
    };
    let expanded = shellexpand::full(text).with_context(|| format!("expanding {text}"))?;
    Ok(PathBuf::from(expanded.into_owned()))
}

/// `$XDG_CONFIG_HOME/sessionlink`, else the platform config dir.
fn default_config_dir() -> Result<PathBuf> {
    env::var_os("XDG_CONFIG_HOME")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .map(|dir| dir.join(APP_NAME))
        .ok_or_else(|| anyhow!("no configuration directory for this platform"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(args: &[&str]) -> RuntimeContext {
        let cli = Cli::try_parse_from(args).unwrap();
        RuntimeContext {
            common: cli.common,
            config_file: PathBuf::from("config.toml"),
            config: ClientConfig::default(),
        }
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_pick_log_level() {
        assert_eq!(context(&["sessionlink", "watch"]).log_level(), LevelFilter::Info);
        assert_eq!(context(&["sessionlink", "-q", "watch"]).log_level(), LevelFilter::Error);
        assert_eq!(context(&["sessionlink", "-v", "watch"]).log_level(), LevelFilter::Debug);
        assert_eq!(context(&["sessionlink", "-vv", "watch"]).log_level(), LevelFilter::Trace);
        assert_eq!(context(&["sessionlink", "--trace", "watch"]).log_level(), LevelFilter::Trace);

        let mut ctx = context(&["sessionlink", "watch"]);
        ctx.config.logging.level = "warn".to_string();
        assert_eq!(ctx.log_level(), LevelFilter::Warn);
    }

    #[test]
    fn removed_flags_are_rejected() {
        assert!(Cli::try_parse_from(["sessionlink", "--diagnostics", "watch"]).is_err());
        assert!(Cli::try_parse_from(["sessionlink", "--color", "always", "watch"]).is_err());
        assert!(Cli::try_parse_from(["sessionlink", "-q", "-v", "watch"]).is_err());
    }
}

//! specwatch CLI commands
//!
//! Runs the presence detector and active-spec resolver against local
//! directories, with git for branch lookup.
//!
//! ## Commands
//!
//! - `specwatch [-C DIR] [--root DIR]... [--config FILE] status [--json]`
//! - `specwatch [-C DIR] [--root DIR]... [--config FILE] watch [--json]`
//!
//! Roots default to the working directory. Relative `--root` and `--config`
//! paths are taken relative to `-C`.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use specwatch_engine::adapters::{GitProviderFactory, LocalFileSystem, LocalWorkspace};
use specwatch_engine::config::{ConfigLoader, WatchConfig};
use specwatch_engine::{
    ActiveSpecResolver, ActiveSpecState, IndicatorView, PresenceDetector, PresenceOptions,
    PresenceStatus, ResolverOptions, StatusIndicator,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LOCAL_CONFIG_FILE: &str = "specwatch.toml";

/// specwatch: spec workflow status for a set of workspace roots
#[derive(Debug, Parser)]
#[command(name = "specwatch", version)]
pub struct SpecwatchCli {
    /// Working directory (defaults to current directory)
    #[arg(short = 'C', long = "cwd", value_name = "DIR", global = true)]
    pub cwd: Option<PathBuf>,

    /// Workspace root; repeat for a multi-root workspace
    #[arg(long = "root", value_name = "DIR", global = true)]
    pub roots: Vec<PathBuf>,

    /// Configuration file (defaults to ./specwatch.toml, then the user config dir)
    #[arg(long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log engine activity to stderr
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: SpecwatchSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum SpecwatchSubcommand {
    /// Print one snapshot of presence, active spec and indicator
    Status(StatusArgs),

    /// Follow changes until interrupted
    Watch(WatchArgs),
}

/// Arguments for `specwatch status`
#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Output as JSON instead of text
    #[arg(long = "json", short = 'j')]
    pub json: bool,
}

/// Arguments for `specwatch watch`
#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Print one JSON object per line instead of text
    #[arg(long = "json", short = 'j')]
    pub json: bool,
}

impl SpecwatchCli {
    /// Run the selected command
    pub async fn run(self) -> anyhow::Result<()> {
        let cwd = match self.cwd {
            Some(dir) => dir,
            None => std::env::current_dir().context("failed to read working directory")?,
        };
        // Watcher events carry absolute paths.
        let cwd = std::path::absolute(&cwd)
            .with_context(|| format!("failed to resolve {}", cwd.display()))?;
        let config = load_config(&cwd, self.config.as_deref())?;

        let roots: Vec<PathBuf> = if self.roots.is_empty() {
            vec![cwd.clone()]
        } else {
            self.roots.iter().map(|root| cwd.join(root)).collect()
        };
        tracing::debug!(?roots, "Starting engines");

        let engines = Engines::start(roots, &config).await;
        let result = match self.command {
            SpecwatchSubcommand::Status(args) => run_status(&engines, &args),
            SpecwatchSubcommand::Watch(args) => run_watch(&engines, &args).await,
        };
        engines.dispose();
        result
    }
}

fn load_config(cwd: &Path, explicit: Option<&Path>) -> anyhow::Result<WatchConfig> {
    let local = cwd.join(LOCAL_CONFIG_FILE);
    let config = match explicit {
        Some(path) => ConfigLoader::new().with_file(cwd.join(path)).load(),
        None if local.exists() => ConfigLoader::new().with_file(local).load(),
        None => ConfigLoader::load_default(),
    };
    config.context("failed to load configuration")
}

/// Both engines over live local adapters.
struct Engines {
    presence: PresenceDetector,
    resolver: ActiveSpecResolver,
}

impl Engines {
    async fn start(roots: Vec<PathBuf>, config: &WatchConfig) -> Self {
        let debounce = config.presence.debounce();
        let workspace = Arc::new(LocalWorkspace::new(roots, debounce));
        let fs = Arc::new(LocalFileSystem);
        let vcs = Arc::new(GitProviderFactory::new(workspace.clone(), debounce));

        let presence = PresenceDetector::new(
            workspace.clone(),
            fs.clone(),
            PresenceOptions::from(&config.presence),
        );
        let resolver = ActiveSpecResolver::new(
            workspace,
            fs,
            ResolverOptions::from_config(&config.resolver, vcs),
        );

        tokio::join!(presence.initialize(), resolver.initialize());
        Self { presence, resolver }
    }

    fn dispose(&self) {
        self.presence.dispose();
        self.resolver.dispose();
    }
}

/// Run the status command
fn run_status(engines: &Engines, args: &StatusArgs) -> anyhow::Result<()> {
    let status = engines.presence.current_status();
    let state = engines.resolver.current_state();
    let view = IndicatorView::render(&status, &state);

    if args.json {
        let json = serde_json::json!({
            "presence": &*status,
            "active_spec": &*state,
            "indicator": view,
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        println!("{}", presence_line(&status));
        println!("{}", spec_line(&state));
        println!("{}", indicator_line(&view));
    }
    Ok(())
}

/// Run the watch command
async fn run_watch(engines: &Engines, args: &WatchArgs) -> anyhow::Result<()> {
    let mut indicator = StatusIndicator::new(&engines.presence, &engines.resolver);
    let (_presence_sub, mut presence_rx) = engines.presence.subscribe_channel();
    let (_state_sub, mut state_rx) = engines.resolver.subscribe_channel();
    let (_view_sub, mut view_rx) = indicator.subscribe_channel();

    let status = engines.presence.current_status();
    let state = engines.resolver.current_state();
    emit(args.json, "presence", serde_json::to_value(&*status)?, presence_line(&status))?;
    emit(args.json, "active_spec", serde_json::to_value(&*state)?, spec_line(&state))?;
    let view = indicator.current_view();
    emit(args.json, "indicator", serde_json::to_value(&view)?, indicator_line(&view))?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("failed to listen for Ctrl-C")?;
                tracing::info!("Interrupted; shutting down");
                break;
            }
            Some(status) = presence_rx.recv() => {
                emit(args.json, "presence", serde_json::to_value(&status)?, presence_line(&status))?;
            }
            Some(state) = state_rx.recv() => {
                emit(args.json, "active_spec", serde_json::to_value(&state)?, spec_line(&state))?;
            }
            Some(view) = view_rx.recv() => {
                emit(args.json, "indicator", serde_json::to_value(&view)?, indicator_line(&view))?;
            }
            else => break,
        }
    }

    indicator.dispose();
    Ok(())
}

fn emit(json: bool, event: &str, value: serde_json::Value, text: String) -> anyhow::Result<()> {
    if json {
        let line = serde_json::json!({ "event": event, "value": value });
        println!("{}", serde_json::to_string(&line)?);
    } else {
        println!("{text}");
    }
    Ok(())
}

fn presence_line(status: &PresenceStatus) -> String {
    if !status.any_root_has_marker {
        return "presence: no marker".to_string();
    }
    let marked: Vec<String> = status
        .marked_roots()
        .map(|root| root.path.display().to_string())
        .collect();
    format!("presence: marker in {}", marked.join(", "))
}

fn spec_line(state: &ActiveSpecState) -> String {
    match state.spec_name.as_deref() {
        Some(name) => {
            let on_disk = if state.spec_exists { "exists" } else { "missing" };
            format!("active spec: {name} (source: {}, {on_disk})", state.source)
        }
        None => "active spec: none".to_string(),
    }
}

fn indicator_line(view: &IndicatorView) -> String {
    if view.visible {
        format!("indicator: {}", view.text)
    } else {
        "indicator: hidden".to_string()
    }
}

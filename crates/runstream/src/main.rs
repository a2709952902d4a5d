use std::env;
use std::fmt;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use config::{Config, Environment, File, FileFormat};
use log::{LevelFilter, debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use runstream::{
    ChatHub, ChatView, ClientReconciler, EngineConfig, EventRouter, HistoryConfig, HistoryStore,
    HubConfig, InMemoryRunContext, JsonlHistoryStore, MemoryHistoryStore, Outbound, Reconciled,
    RouterConfig, ViewItem,
};
use runstream_protocol::{AgentEvent, VerboseLevel};

const APP_NAME: &str = "runstream";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_replay(ctx: RuntimeContext, cmd: ReplayCommand) -> Result<()> {
    handle_replay(&ctx, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved paths: {}", ctx.paths);

    match cli.command {
        Command::Replay(cmd) => async_replay(ctx, cmd),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Runstream - reconcile agent run events into chat bubbles.",
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
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true, conflicts_with = "yaml")]
    json: bool,
    /// Output machine readable YAML
    #[arg(long, global = true)]
    yaml: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Do not change anything on disk
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,
    /// Assume "yes" for interactive prompts
    #[arg(short = 'y', long = "yes", alias = "force", global = true)]
    assume_yes: bool,
    /// Emit additional diagnostics for troubleshooting
    #[arg(long = "diagnostics", global = true)]
    diagnostics: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Route a recorded event stream and print what clients would see
    Replay(ReplayCommand),
    /// Create config directories and default files
    Init(InitCommand),
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
struct ReplayCommand {
    /// Newline-delimited agent events (reads stdin when omitted)
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,
    /// Session the replayed runs belong to
    #[arg(long, value_name = "KEY")]
    session: String,
    /// Client run id to link the first execution run to
    #[arg(long = "run-id", value_name = "ID")]
    run_id: Option<String>,
    /// Directory of <session>.jsonl history files (overrides history.dir)
    #[arg(long, value_name = "PATH")]
    history: Option<PathBuf>,
    /// Verbosity of the session (controls general-channel tool events)
    #[arg(long = "session-verbose", value_enum, value_name = "LEVEL")]
    session_verbose: Option<VerboseOption>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VerboseOption {
    Off,
    On,
    Full,
}

impl From<VerboseOption> for VerboseLevel {
    fn from(value: VerboseOption) -> Self {
        match value {
            VerboseOption::Off => VerboseLevel::Off,
            VerboseOption::On => VerboseLevel::On,
            VerboseOption::Full => VerboseLevel::Full,
        }
    }
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
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.clone())?;
        let config = load_or_init_config(&paths, &common)?;
        Ok(Self {
            common,
            paths,
            config,
        })
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = self.effective_log_level().as_str().to_ascii_lowercase();
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{APP_NAME}={level}")));

        // Logs go to stderr; stdout carries replay output.
        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(!disable_color)
                        .with_target(self.common.diagnostics)
                        .with_file(self.common.diagnostics)
                        .with_line_number(self.common.diagnostics),
                )
                .try_init()
                .ok();
        }

        // Also init env_logger for the engine's log facade
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder.filter_level(self.effective_log_level());
        builder.try_init().ok();

        Ok(())
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => LevelFilter::from_str(&self.config.logging.level).unwrap_or(LevelFilter::Info),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

#[derive(Debug, Clone)]
struct AppPaths {
    config_file: PathBuf,
}

impl AppPaths {
    fn discover(override_path: Option<PathBuf>) -> Result<Self> {
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

        Ok(Self { config_file })
    }
}

impl fmt::Display for AppPaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config: {}", self.config_file.display())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct AppConfig {
    logging: LoggingConfig,
    router: RouterConfig,
    hub: HubConfig,
    history: HistoryConfig,
}

impl AppConfig {
    fn engine(&self) -> EngineConfig {
        EngineConfig {
            router: self.router.clone(),
            hub: self.hub.clone(),
            history: self.history.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct LoggingConfig {
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ============================================================================
// Replay
// ============================================================================

async fn handle_replay(ctx: &RuntimeContext, cmd: ReplayCommand) -> Result<()> {
    let engine = ctx.config.engine();

    let run_context = Arc::new(InMemoryRunContext::new());
    if let Some(level) = cmd.session_verbose {
        run_context.set_verbose(&cmd.session, level.into());
    }
    let mut router = EventRouter::new(engine.router.clone(), run_context.clone());

    let hub = ChatHub::new(&engine.hub);
    let mut conn = hub.register_connection();
    hub.subscribe_session(conn.id(), &cmd.session);

    let store = open_history_store(cmd.history.clone(), &engine.history)?;
    let mut reconciler = ClientReconciler::new(cmd.session.clone());
    reconciler
        .refresh(store.as_ref())
        .await
        .context("loading session history")?;
    if let Some(run_id) = &cmd.run_id {
        reconciler.attach(run_id);
    }

    let reader: Box<dyn AsyncBufRead + Unpin> = match &cmd.file {
        Some(path) => Box::new(BufReader::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening event file {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let mut lines = reader.lines();
    let mut line_no = 0usize;
    let mut linked = false;
    let mut routed = 0usize;
    while let Some(line) = lines.next_line().await.context("reading event stream")? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: AgentEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(err) => {
                warn!("Skipping malformed event on line {}: {}", line_no, err);
                continue;
            }
        };

        if event.session_key.is_none() && !run_context.is_active(&event.run_id) {
            run_context.register_run(&event.run_id, &cmd.session);
        }
        if let Some(client_run_id) = &cmd.run_id
            && !linked
        {
            router.begin_run(&event.run_id, &cmd.session, client_run_id);
            linked = true;
        }

        let out = router.route(event);
        routed += 1;
        hub.dispatch_all(&out);

        for outbound in conn.drain() {
            println!(
                "{}",
                serde_json::to_string(&outbound).context("serializing outbound")?
            );
            apply_to_reconciler(&mut reconciler, store.as_ref(), &outbound).await?;
        }
    }

    info!(
        "Replayed {} events for session {} ({} deltas dropped)",
        routed,
        cmd.session,
        hub.dropped_count(conn.id())
    );
    print_view(ctx, &reconciler.view())
}

async fn apply_to_reconciler(
    reconciler: &mut ClientReconciler,
    store: &dyn HistoryStore,
    outbound: &Outbound,
) -> Result<()> {
    let Some(chat) = outbound.as_chat() else {
        return Ok(());
    };
    // Replay observes every run of the session, not only ones it started.
    if reconciler.active_run().is_none() && !chat.is_terminal() {
        reconciler.attach(&chat.run_id);
    }
    if let Reconciled::Terminal(phase) = reconciler.apply(chat) {
        debug!("Run {} ended as {:?}, refreshing history", chat.run_id, phase);
        reconciler
            .refresh(store)
            .await
            .context("refreshing session history")?;
    }
    Ok(())
}

fn open_history_store(
    override_dir: Option<PathBuf>,
    config: &HistoryConfig,
) -> Result<Box<dyn HistoryStore>> {
    let dir = match (override_dir, config.dir.as_deref()) {
        (Some(dir), _) => Some(expand_path(dir)?),
        (None, Some(dir)) => Some(expand_str_path(dir)?),
        (None, None) => None,
    };
    Ok(match dir {
        Some(dir) => {
            debug!("Using JSONL history in {}", dir.display());
            Box::new(JsonlHistoryStore::new(dir))
        }
        None => Box::new(MemoryHistoryStore::new()),
    })
}

fn print_view(ctx: &RuntimeContext, view: &ChatView) -> Result<()> {
    if ctx.common.json {
        println!(
            "{}",
            serde_json::to_string_pretty(view).context("serializing view to JSON")?
        );
        return Ok(());
    }
    if ctx.common.yaml {
        println!(
            "{}",
            serde_yaml::to_string(view).context("serializing view to YAML")?
        );
        return Ok(());
    }

    println!("session {} ({:?})", view.session_key, view.phase);
    for item in &view.items {
        match item {
            ViewItem::Group {
                role,
                messages,
                tool_cards,
            } => {
                println!(
                    "  [{}] {} message(s), {} tool card(s)",
                    role,
                    messages.len(),
                    tool_cards.len()
                );
                for message in messages {
                    if let Some(text) = message.text() {
                        println!("    {text}");
                    }
                }
                for card in tool_cards {
                    println!("    <{}> {:?}", card.name, card.status);
                }
            }
            ViewItem::Streaming(message) => {
                println!("  [streaming #{}] {}", message.index, message.text);
            }
        }
    }
    if let Some(error) = &view.error {
        println!("  error: {error}");
    }
    Ok(())
}

// ============================================================================
// Config management
// ============================================================================

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.paths.config_file.exists() && !(cmd.force || ctx.common.assume_yes) {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }

    if ctx.common.dry_run {
        info!(
            "dry-run: would write default config to {}",
            ctx.paths.config_file.display()
        );
        return Ok(());
    }

    write_default_config(&ctx.paths.config_file)
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
            } else if ctx.common.yaml {
                println!(
                    "{}",
                    serde_yaml::to_string(&ctx.config).context("serializing config to YAML")?
                );
            } else {
                println!("{:#?}", ctx.config);
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                info!(
                    "dry-run: would reset config at {}",
                    ctx.paths.config_file.display()
                );
                return Ok(());
            }
            write_default_config(&ctx.paths.config_file)
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

fn load_or_init_config(paths: &AppPaths, common: &CommonOpts) -> Result<AppConfig> {
    if !paths.config_file.exists() {
        if common.dry_run {
            info!(
                "dry-run: would create default config at {}",
                paths.config_file.display()
            );
        } else {
            write_default_config(&paths.config_file)?;
        }
    }

    let defaults = RouterConfig::default();
    let env_prefix = env_prefix();
    let built = Config::builder()
        .set_default("logging.level", "info")?
        .set_default("router.emit_seq_gaps", defaults.emit_seq_gaps)?
        .set_default(
            "hub.slow_consumer_threshold",
            HubConfig::default().slow_consumer_threshold as i64,
        )?
        .add_source(
            File::from(paths.config_file.as_path())
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(env_prefix.as_str()).separator("__"))
        .build()?;

    let mut config: AppConfig = built.try_deserialize()?;

    if let Some(ref dir) = config.history.dir {
        let expanded = expand_str_path(dir)?;
        config.history.dir = Some(expanded.display().to_string());
    }

    Ok(config)
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    let mut buffer = String::new();
    buffer.push_str("# Configuration for ");
    buffer.push_str(APP_NAME);
    buffer.push('\n');
    buffer.push_str("# File: ");
    buffer.push_str(&path.display().to_string());
    buffer.push_str("\n\n");
    buffer
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        let mut path = PathBuf::from(dir);
        path.push(APP_NAME);
        return Ok(path);
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

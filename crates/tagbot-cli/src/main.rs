//! tagbot CLI
//!
//! Runs one dispatch against a JSON bot snapshot and prints the outcome.
//!
//! # Commands
//!
//! ```text
//! tagbot shout   --state bots.json <event> [--arg JSON] [--bot ID]... [--no-sort]
//!                [--user ID] [--apply OUT]
//! tagbot destroy --state bots.json <bot-id> [--apply OUT]
//! ```
//!
//! The state file maps bot ids to `{ "id", "tags" }` objects (`null` for a
//! tombstoned bot). Output is a JSON document on stdout; logs go to stderr.
//!
//! # Configuration Priority
//!
//! 1. CLI arguments (highest)
//! 2. Environment variables (`TAGBOT_*`)
//! 3. Explicit config file (`--config`)
//! 4. Project config (`<project>/tagbot.toml`)
//! 5. Default values (lowest)
//!
//! # Environment Variables
//!
//! | Variable | Config field |
//! |----------|--------------|
//! | `TAGBOT_ENERGY` | `energy.budget` |
//! | `TAGBOT_ENERGY_STEP` | `energy.step` |
//! | `TAGBOT_MAX_DEPTH` | `dispatch.max_depth` |
//! | `RUST_LOG` | log filter when neither `-d` nor `-v` is given |

use anyhow::{anyhow, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde_json::{json, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tagbot_event::{apply_actions, BotAction, ShoutAction};
use tagbot_lua::LuaSandbox;
use tagbot_runtime::config::{ConfigLoader, RuntimeConfig};
use tagbot_runtime::{
    calculate_action_results, calculate_destroy_bot_events, resolve_rejected_actions,
    CalculationContext,
};
use tagbot_types::{BotId, BotsState};
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "tagbot")]
#[command(version, about = "Run tag scripts against a bot snapshot", long_about = None)]
struct Args {
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable verbose (info) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project root; `tagbot.toml` is read from here.
    #[arg(short = 'C', long, global = true)]
    project: Option<PathBuf>,

    /// Extra config file, layered over the project config.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Energy budget override.
    #[arg(long, global = true)]
    energy: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Shout an event and print the resulting events and results.
    Shout(ShoutArgs),
    /// Print the destroy cascade of one bot.
    Destroy(DestroyArgs),
}

#[derive(ClapArgs, Debug)]
struct StateArgs {
    /// JSON bot snapshot.
    #[arg(short, long)]
    state: PathBuf,

    /// Write the snapshot with the events applied to this file.
    #[arg(long, value_name = "OUT")]
    apply: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
struct ShoutArgs {
    #[command(flatten)]
    state: StateArgs,

    /// Event name, e.g. `onClick`.
    event: String,

    /// Argument passed to listeners as `that` (JSON).
    #[arg(long, value_name = "JSON")]
    arg: Option<String>,

    /// Restrict the shout to these bots (repeatable).
    #[arg(long = "bot", value_name = "ID")]
    bots: Vec<String>,

    /// Run targets in the order given instead of by id.
    #[arg(long)]
    no_sort: bool,

    /// Bot acting as the user.
    #[arg(long, value_name = "ID")]
    user: Option<String>,
}

#[derive(ClapArgs, Debug)]
struct DestroyArgs {
    #[command(flatten)]
    state: StateArgs,

    /// Bot to destroy.
    bot_id: String,
}

/// Layers CLI overrides on top of [`ConfigLoader`].
struct CliConfigResolver {
    project_root: PathBuf,
    config_file: Option<PathBuf>,
    energy: Option<u64>,
}

impl CliConfigResolver {
    fn from_args(args: &Args) -> Result<Self> {
        let project_root = match &args.project {
            Some(path) => path.clone(),
            None => std::env::current_dir().context("cannot determine current directory")?,
        };
        Ok(Self {
            project_root,
            config_file: args.config.clone(),
            energy: args.energy,
        })
    }

    fn resolve(&self) -> Result<RuntimeConfig> {
        let mut loader = ConfigLoader::new().with_project_root(&self.project_root);
        if let Some(file) = &self.config_file {
            loader = loader.with_file(file);
        }
        let mut config = loader.load().context("config error")?;
        if let Some(budget) = self.energy {
            config.energy.budget = budget;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // --debug > --verbose > RUST_LOG > warn
    let filter = if args.debug {
        EnvFilter::new("debug")
    } else if args.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .init();

    let resolver = CliConfigResolver::from_args(&args)?;
    let config = resolver.resolve()?;
    info!(path = %resolver.project_root.display(), "Project root");
    debug!(?config, "Resolved config");

    let output = match &args.command {
        Command::Shout(shout) => run_shout(shout, config)?,
        Command::Destroy(destroy) => run_destroy(destroy, config)?,
    };

    let text = serde_json::to_string_pretty(&output).context("cannot encode output")?;
    println!("{text}");
    Ok(())
}

fn run_shout(args: &ShoutArgs, config: RuntimeConfig) -> Result<JsonValue> {
    let state = load_state(&args.state.state)?;

    let mut shout = ShoutAction::new(&args.event);
    if let Some(arg) = &args.arg {
        let argument: JsonValue =
            serde_json::from_str(arg).with_context(|| format!("--arg is not valid JSON: {arg}"))?;
        shout = shout.with_argument(argument);
    }
    if !args.bots.is_empty() {
        shout = shout.to(args.bots.iter().map(String::as_str));
    }
    if args.no_sort || !config.dispatch.default_sort_bot_ids {
        shout = shout.unsorted();
    }
    if let Some(user) = &args.user {
        shout = shout.from_user(user.as_str());
    }

    let mut context = new_context(&state, config)?;
    if let Some(user) = &args.user {
        context = context.with_user(user.as_str());
    }

    info!(event = %args.event, bots = state.len(), "Dispatching shout");
    let results = calculate_action_results(&mut context, &shout)
        .with_context(|| format!("shout '{}' failed", args.event))?;
    let events = resolve_rejected_actions(results.events);

    write_applied(&args.state, state, &events)?;
    Ok(json!({
        "events": events,
        "results": results.results,
        "listeners": results.listeners,
    }))
}

fn run_destroy(args: &DestroyArgs, config: RuntimeConfig) -> Result<JsonValue> {
    let state = load_state(&args.state.state)?;
    let mut context = new_context(&state, config)?;

    let bot_id = BotId::new(args.bot_id.as_str());
    let events = calculate_destroy_bot_events(&mut context, &bot_id)
        .with_context(|| format!("destroying '{bot_id}' failed"))?;
    if events.is_empty() {
        info!(bot = %bot_id, "Nothing to destroy");
    }

    write_applied(&args.state, state, &events)?;
    Ok(json!({ "events": events }))
}

fn new_context(state: &BotsState, config: RuntimeConfig) -> Result<CalculationContext> {
    let sandbox = LuaSandbox::new().map_err(|e| anyhow!("cannot start the Lua sandbox: {e}"))?;
    Ok(CalculationContext::from_state(state, Rc::new(sandbox)).with_config(config))
}

fn load_state(path: &Path) -> Result<BotsState> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read state file {}", path.display()))?;
    let state: BotsState = serde_json::from_str(&text)
        .with_context(|| format!("invalid state file {}", path.display()))?;
    state
        .validate()
        .with_context(|| format!("invalid state file {}", path.display()))?;
    debug!(path = %path.display(), bots = state.len(), "Loaded state");
    Ok(state)
}

fn write_applied(args: &StateArgs, mut state: BotsState, events: &[BotAction]) -> Result<()> {
    let Some(out) = &args.apply else {
        return Ok(());
    };
    apply_actions(&mut state, events);
    let text = serde_json::to_string_pretty(&state).context("cannot encode state")?;
    std::fs::write(out, text).with_context(|| format!("cannot write {}", out.display()))?;
    info!(path = %out.display(), "Wrote applied state");
    Ok(())
}

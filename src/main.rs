//! NVIDIA Digital Vibrance CLI tool
//!
//! Digital vibrance is not part of the public NvAPI headers. The required functions are resolved
//! at runtime through `nvapi_QueryInterface` using their numeric IDs.

use std::io;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{
    crate_description, crate_name, crate_version, value_parser, Arg, ArgAction, ArgMatches, Command,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::capability::CapabilityTable;
use crate::dispatch::{Dispatcher, Operation};
use crate::display::{primary_marker, DisplayEnumerator, SystemDisplays, Targets};
use crate::driver::DriverHandle;
use crate::error::{Error, Result};
use crate::instance::InstanceLock;
use crate::vibrance::Field;

mod capability;
mod dispatch;
mod display;
mod driver;
mod error;
mod instance;
mod vibrance;

/// Name of the system-wide instance lock.
const LOCK_NAME: &str = "nvdv";

/// Exit code after an interrupt.
const INTERRUPTED_EXIT_CODE: u8 = 130;

/// Action requested on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Action {
    /// Print the primary display number.
    Primary,
    /// Apply an operation to the target displays.
    Run(Operation),
}

/// Runtime configuration.
#[derive(Debug)]
struct Config {
    action: Action,
    targets: Targets,
    verbosity: u8,
}

impl Config {
    /// Build the config from CLI matches.
    ///
    /// Returns `None` if no valid subcommand was selected.
    fn from_cli(matches: &ArgMatches) -> Option<Self> {
        let raw = matches.get_flag("raw");

        let operation = match matches.subcommand()? {
            ("get", get) => {
                let field = match get.subcommand_name() {
                    Some("primary") => {
                        return Some(Self::new(matches, Action::Primary));
                    },
                    Some("min") => Field::Min,
                    Some("max") => Field::Max,
                    _ => Field::Current,
                };
                Operation::Get { field, raw }
            },
            ("set", set) => Operation::Set { value: *set.get_one::<u32>("value")?, raw },
            ("enable", _) => Operation::Enable,
            ("disable", _) => Operation::Disable,
            ("toggle", _) => Operation::Toggle,
            ("info", _) => Operation::Info,
            _ => return None,
        };

        Some(Self::new(matches, Action::Run(operation)))
    }

    fn new(matches: &ArgMatches, action: Action) -> Self {
        // Explicit displays are ignored when targeting all of them.
        let targets = if matches.get_flag("all") {
            Targets::All
        } else {
            match matches.get_many::<usize>("display") {
                Some(displays) => Targets::Displays(displays.copied().collect()),
                None => Targets::Primary,
            }
        };

        Self { action, targets, verbosity: matches.get_count("verbose") }
    }
}

fn main() -> ExitCode {
    let matches = cli().get_matches();

    let config = match Config::from_cli(&matches) {
        Some(config) => config,
        None => {
            let _ = cli().print_help();
            return ExitCode::FAILURE;
        },
    };

    init_logging(config.verbosity);

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            match err {
                Error::Interrupted => ExitCode::from(INTERRUPTED_EXIT_CODE),
                _ => ExitCode::FAILURE,
            }
        },
    }
}

/// Execute the configured action.
fn run(config: &Config) -> Result<()> {
    // Dropped last, after the driver has been released.
    let _lock = match InstanceLock::acquire(LOCK_NAME)? {
        Some(lock) => lock,
        None => {
            info!("Another instance is already running");
            return Ok(());
        },
    };

    let interrupted = Arc::new(AtomicBool::new(false));
    let handler_interrupted = interrupted.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_interrupted.store(true, Ordering::SeqCst))
    {
        warn!("Unable to install interrupt handler: {}", err);
    }

    let displays = SystemDisplays;

    let operation = match config.action {
        Action::Primary => {
            println!("{}", displays.primary_display()?);
            return Ok(());
        },
        Action::Run(operation) => operation,
    };

    let driver = CapabilityTable::initialize(DriverHandle::acquire()?)?;

    // Resolve targets right before use, to pick up the current display set.
    let targets = config.targets.resolve(&displays)?;
    let primary = match config.targets {
        Targets::Primary => targets.first().copied(),
        _ => primary_marker(&displays),
    };

    let dispatcher = Dispatcher::new(&driver, primary, &interrupted);
    dispatcher.apply(&operation, &targets, &mut io::stdout().lock())
}

/// Log to STDERR, keeping STDOUT for command output.
///
/// `RUST_LOG` takes precedence over the verbosity flag.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .init();
}

/// Get clap CLI parameters.
fn cli() -> Command {
    Command::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("display")
                .help("Display number, repeatable [default: primary display]")
                .long("display")
                .short('d')
                .global(true)
                .action(ArgAction::Append)
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("all")
                .help("Handle all connected displays (overrides `--display`)")
                .long("all")
                .short('a')
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("raw")
                .help("Use raw driver values instead of a percentage based scale")
                .long("raw")
                .short('r')
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .help("Increase log verbosity")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::Count),
        )
        .subcommand(
            Command::new("get")
                .about("Print the current digital vibrance")
                .subcommand(Command::new("min").about("Print the minimum digital vibrance"))
                .subcommand(Command::new("max").about("Print the maximum digital vibrance"))
                .subcommand(
                    Command::new("primary").about("Print the number of the primary display"),
                ),
        )
        .subcommand(
            Command::new("set").about("Set the digital vibrance").arg(
                Arg::new("value")
                    .help("Value in range [0, 100] ([MIN, MAX] with `--raw`)")
                    .required(true)
                    .value_parser(value_parser!(u32)),
            ),
        )
        .subcommand(Command::new("enable").about("Enable digital vibrance (set to MAX)"))
        .subcommand(Command::new("disable").about("Disable digital vibrance (set to MIN)"))
        .subcommand(
            Command::new("toggle").about("Toggle digital vibrance (MAX if at MIN, otherwise MIN)"),
        )
        .subcommand(Command::new("info").about("Print digital vibrance info"))
}

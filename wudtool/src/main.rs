use std::{env, error::Error, ffi::OsStr, path::PathBuf};

use argp::{FromArgValue, FromArgs};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use wudtool::{run, SubCommand};

#[derive(FromArgs, Debug)]
/// Tool for reading, writing & extracting Wii U disc images.
struct TopLevel {
    #[argp(subcommand)]
    command: SubCommand,
    #[argp(option, short = 'C')]
    /// Change working directory before running the command.
    chdir: Option<PathBuf>,
    #[argp(option, short = 'L')]
    /// Minimum logging level: error, warn, info, debug or trace. (Default: info)
    log_level: Option<LogLevel>,
    #[argp(switch)]
    /// Disable color output. (env: NO_COLOR)
    no_color: bool,
}

/// Thin wrapper so a tracing level filter can be an argp option value.
#[derive(Debug, Copy, Clone)]
struct LogLevel(LevelFilter);

impl FromArgValue for LogLevel {
    fn from_arg_value(value: &OsStr) -> Result<Self, String> {
        match value.to_str() {
            Some("error") => Ok(LogLevel(LevelFilter::ERROR)),
            Some("warn") => Ok(LogLevel(LevelFilter::WARN)),
            Some("info") => Ok(LogLevel(LevelFilter::INFO)),
            Some("debug") => Ok(LogLevel(LevelFilter::DEBUG)),
            Some("trace") => Ok(LogLevel(LevelFilter::TRACE)),
            _ => Err(format!("Unknown log level {:?}", value)),
        }
    }
}

fn want_colors(args: &TopLevel) -> bool {
    if args.no_color {
        return false;
    }
    // NO_COLOR set to anything but "" or "0" wins over terminal detection
    if env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty() && v != "0") {
        return false;
    }
    // Windows consoles may need ANSI sequences switched on first
    let _ = enable_ansi_support::enable_ansi_support();
    supports_color::on(supports_color::Stream::Stdout).is_some()
}

fn init_logging(args: &TopLevel) {
    // -L sets the default level; RUST_LOG directives still take precedence
    let default = args.log_level.map_or(LevelFilter::INFO, |level| level.0);
    let filter = EnvFilter::builder().with_default_directive(default.into()).from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(want_colors(args))
        .with_target(false)
        .without_time()
        .init();
}

fn try_main(args: TopLevel) -> wud::Result<()> {
    if let Some(dir) = &args.chdir {
        env::set_current_dir(dir).map_err(|e| {
            wud::Error::Io(format!("Changing working directory to {}", dir.display()), e)
        })?;
    }
    run(args.command)
}

fn main() {
    let args: TopLevel = argp::parse_args_or_exit(argp::DEFAULT);
    init_logging(&args);
    if let Err(e) = try_main(args) {
        eprintln!("Failed: {}", e);
        let mut source = e.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {}", cause);
            source = cause.source();
        }
        std::process::exit(1);
    }
}

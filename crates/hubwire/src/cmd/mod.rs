use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod decode;
pub mod demo;
pub mod invoke;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the demo hub.
    Serve(ServeArgs),
    /// Invoke one hub method and print the reply.
    Invoke(InvokeArgs),
    /// Decode record-separated frames from a file or stdin.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Invoke(args) => invoke::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on (`host:port`, `tcp://host:port`, `unix:///path`).
    #[arg(env = "HUBWIRE_LISTEN")]
    pub addr: String,
    /// Interval between keep-alive pings (e.g. 15s, 500ms).
    #[arg(long, default_value = "15s", conflicts_with = "no_keep_alive")]
    pub keep_alive: String,
    /// Do not send keep-alive pings.
    #[arg(long)]
    pub no_keep_alive: bool,
    /// Close connections silent for this long (e.g. 30s).
    #[arg(long, default_value = "30s", conflicts_with = "no_client_timeout")]
    pub client_timeout: String,
    /// Never close silent connections.
    #[arg(long)]
    pub no_client_timeout: bool,
    /// Items handed to a method's stream channel ahead of its reads.
    #[arg(long, default_value_t = hubwire_hub::DEFAULT_UPSTREAM_BUFFER)]
    pub upstream_buffer: usize,
    /// Send method failure details to clients.
    #[arg(long, env = "HUBWIRE_DETAILED_ERRORS")]
    pub detailed_errors: bool,
    /// Exit after N connections have been served.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct InvokeArgs {
    /// Hub address to connect to.
    pub addr: String,
    /// Method name.
    pub target: String,
    /// Arguments as a JSON array (a single non-array value is one argument).
    #[arg(long, value_name = "JSON")]
    pub args: Option<String>,
    /// Invocation id to send.
    #[arg(long, default_value = "1", conflicts_with = "no_wait")]
    pub id: String,
    /// Send as a streaming invocation.
    #[arg(long)]
    pub stream: bool,
    /// Fire and forget: send without an id and exit.
    #[arg(long)]
    pub no_wait: bool,
    /// Maximum time to wait for each reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// File of record-separated frames. Reads stdin when omitted.
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

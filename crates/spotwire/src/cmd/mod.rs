use std::time::Duration;

use clap::{Args, Subcommand};
use spotwire_mercury::{connect, MercuryMethod, Session, SessionConfig, SessionKeys};
use spotwire_transport::StaticResolver;

use crate::exit::{mercury_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod get;
pub mod resolve;
pub mod subscribe;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print access-point candidates in connect order.
    Resolve(ResolveArgs),
    /// Send one Mercury request and print the response.
    Get(GetArgs),
    /// Subscribe to a URI prefix and print pushes until interrupted.
    Subscribe(SubscribeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Resolve(args) => resolve::run(args, format),
        Command::Get(args) => get::run(args, format),
        Command::Subscribe(args) => subscribe::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug, Clone)]
pub struct ApArgs {
    /// Access points to try, in order (host:port, comma-separated).
    #[arg(long = "ap", env = "SPOTWIRE_AP", value_delimiter = ',')]
    pub access_points: Vec<String>,
    /// Do not fall back to the built-in access point.
    #[arg(long)]
    pub no_fallback: bool,
}

impl ApArgs {
    pub fn resolver(&self) -> StaticResolver {
        let resolver = StaticResolver::new(self.access_points.iter().cloned());
        if self.no_fallback {
            resolver.without_fallback()
        } else {
            resolver
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    #[command(flatten)]
    pub ap: ApArgs,
    /// Hex-encoded client-to-server key.
    #[arg(long, env = "SPOTWIRE_SEND_KEY", hide_env_values = true)]
    pub send_key: String,
    /// Hex-encoded server-to-client key.
    #[arg(long, env = "SPOTWIRE_RECV_KEY", hide_env_values = true)]
    pub recv_key: String,
    /// TCP connect timeout per candidate (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
}

impl SessionArgs {
    pub fn keys(&self) -> CliResult<SessionKeys> {
        Ok(SessionKeys::new(
            parse_key("--send-key", &self.send_key)?,
            parse_key("--recv-key", &self.recv_key)?,
        ))
    }

    /// Resolve, connect and open a session.
    pub fn open(&self, mut config: SessionConfig) -> CliResult<Session> {
        config.connect.connect_timeout = parse_duration(&self.connect_timeout)?;
        let keys = self.keys()?;
        connect(&self.ap.resolver(), &keys, config)
            .map_err(|err| mercury_error("connect failed", err))
    }
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub ap: ApArgs,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Mercury URI to request.
    pub uri: String,
    #[command(flatten)]
    pub session: SessionArgs,
    /// Request method (GET or SEND).
    #[arg(long, default_value = "GET", value_parser = parse_method)]
    pub method: MercuryMethod,
    /// Payload parts sent after the header (repeatable).
    #[arg(long = "part")]
    pub parts: Vec<String>,
    /// Request deadline (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
    /// Exit non-zero when the response status is 400 or above.
    #[arg(long)]
    pub fail_on_status: bool,
}

#[derive(Args, Debug)]
pub struct SubscribeArgs {
    /// URI prefix to subscribe to.
    pub prefix: String,
    #[command(flatten)]
    pub session: SessionArgs,
    /// Exit after receiving N pushes.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn parse_method(input: &str) -> Result<MercuryMethod, String> {
    match input.parse::<MercuryMethod>() {
        Ok(method @ (MercuryMethod::Get | MercuryMethod::Send)) => Ok(method),
        Ok(other) => Err(format!("{other} is issued by the subscribe command")),
        Err(err) => Err(err.to_string()),
    }
}

pub fn parse_key(flag: &str, input: &str) -> CliResult<Vec<u8>> {
    let key = hex::decode(input.trim())
        .map_err(|err| CliError::new(USAGE, format!("{flag} is not valid hex: {err}")))?;
    if key.is_empty() {
        return Err(CliError::new(USAGE, format!("{flag} must not be empty")));
    }
    Ok(key)
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    if millis {
        Ok(Duration::from_millis(value))
    } else {
        Ok(Duration::from_secs(value))
    }
}

//! Purpose: `slotproxy` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs the server or a one-shot call, emits JSON on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr; TTY errors are plain text.
//! Invariants: Process exit code is derived from `to_exit_code`.
//! Invariants: Diagnostics go to stderr so stdout stays machine-readable.
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde::Serialize;
use serde_json::{Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

use slotproxy::serve::{self, ServeConfig};
use slotproxy::{
    BookingRequest, Error, ErrorKind, Operation, UpstreamHandle, UpstreamSettings, booking,
    to_exit_code,
};

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(exit_code);
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint("Try `slotproxy --help`."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    dispatch_command(cli.command)
        .map(|()| 0)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "slotproxy",
    version,
    about = "JSON front end for an upstream SOAP booking service",
    long_about = None,
    after_help = r#"EXAMPLES
  $ WSDL_URL='http://10.0.0.5/base/ws/queue.1cws?wsdl' slotproxy serve
  $ slotproxy call next-slot --garage 117 --phone +79990001122 --wsdl-url "$WSDL_URL"
  $ curl -s localhost:3000/api/auth -d '{"garageNumber":"117","phone":"+79990001122"}'

NOTES
  - Credentials come from --login/--password-file or WSDL_LOGIN/WSDL_PASSWORD
  - Log verbosity follows RUST_LOG (default: info); logs go to stderr"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Serve the booking routes over HTTP",
        long_about = r#"Serve the four booking routes over HTTP.

POST /api/auth, /api/cancel, /api/next-slot and /api/queue accept a JSON body,
call the matching upstream SOAP operation and answer with the unwrapped data.
The upstream client is connected on first use and reused afterwards."#,
        after_help = r#"EXAMPLES
  $ slotproxy serve --wsdl-url 'http://10.0.0.5/base/ws/queue.1cws?wsdl'
  $ slotproxy serve --bind 0.0.0.0:8080 --login web --password-file ./wsdl-password"#
    )]
    Serve {
        #[arg(long, default_value = "127.0.0.1:3000", help = "Bind address")]
        bind: SocketAddr,
        #[arg(
            long,
            default_value_t = 64 * 1024,
            help = "Maximum accepted request body size in bytes"
        )]
        max_body_bytes: u64,
        #[command(flatten)]
        upstream: UpstreamArgs,
    },
    #[command(
        arg_required_else_help = true,
        about = "Invoke one booking operation and print its data",
        after_help = r#"EXAMPLES
  $ slotproxy call auth --garage 117 --phone +79990001122
  $ slotproxy call queue --garage 117 --phone +79990001122 --reg-time 2026-10-18T10:00:00"#
    )]
    Call {
        #[arg(value_enum, help = "Operation to invoke")]
        operation: OperationArg,
        #[arg(long, help = "Garage number")]
        garage: String,
        #[arg(long, help = "Phone number")]
        phone: String,
        #[arg(long, help = "Requested slot time (required for queue)")]
        reg_time: Option<String>,
        #[command(flatten)]
        upstream: UpstreamArgs,
    },
    #[command(about = "Print version info")]
    Version,
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completions",
        after_help = r#"EXAMPLES
  $ slotproxy completion bash > ~/.local/share/bash-completion/completions/slotproxy
  $ slotproxy completion zsh > ~/.zfunc/_slotproxy"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OperationArg {
    Auth,
    Cancel,
    NextSlot,
    Queue,
}

impl From<OperationArg> for Operation {
    fn from(value: OperationArg) -> Self {
        match value {
            OperationArg::Auth => Operation::Authorize,
            OperationArg::Cancel => Operation::Cancel,
            OperationArg::NextSlot => Operation::NextSlot,
            OperationArg::Queue => Operation::Enqueue,
        }
    }
}

#[derive(Args)]
struct UpstreamArgs {
    #[arg(
        long,
        env = "WSDL_URL",
        help = "Upstream WSDL URL",
        value_hint = ValueHint::Url
    )]
    wsdl_url: Option<String>,
    #[arg(
        long,
        help = "Override the service endpoint advertised by the WSDL",
        value_hint = ValueHint::Url
    )]
    endpoint: Option<String>,
    #[arg(long, env = "WSDL_LOGIN", help = "Basic auth login for the upstream service")]
    login: Option<String>,
    #[arg(
        long,
        env = "WSDL_PASSWORD",
        hide_env_values = true,
        help = "Basic auth password (prefer --password-file)"
    )]
    password: Option<String>,
    #[arg(
        long,
        help = "Read the Basic auth password from a file",
        value_hint = ValueHint::FilePath
    )]
    password_file: Option<PathBuf>,
    #[arg(long, default_value_t = 30_000, help = "Upstream request timeout in milliseconds")]
    timeout_ms: u64,
}

impl From<UpstreamArgs> for UpstreamSettings {
    fn from(args: UpstreamArgs) -> Self {
        UpstreamSettings {
            wsdl_url: args.wsdl_url,
            endpoint: args.endpoint,
            login: args.login,
            password: args.password,
            password_file: args.password_file,
            timeout_ms: Some(args.timeout_ms),
        }
    }
}

fn dispatch_command(command: Command) -> Result<(), Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "slotproxy", &mut io::stdout());
            Ok(())
        }
        Command::Version => {
            emit_version_output();
            Ok(())
        }
        Command::Serve {
            bind,
            max_body_bytes,
            upstream,
        } => {
            init_tracing();
            let config = ServeConfig {
                bind,
                max_body_bytes,
            };
            serve::validate_config(&config)?;
            let soap = UpstreamSettings::from(upstream).into_soap_config()?;
            let handle = UpstreamHandle::new(soap);
            runtime()?.block_on(serve::serve(config, handle))
        }
        Command::Call {
            operation,
            garage,
            phone,
            reg_time,
            upstream,
        } => {
            init_tracing();
            let operation = Operation::from(operation);
            let mut request = BookingRequest::new(garage, phone);
            if let Some(reg_time) = reg_time {
                request = request.with_reg_time(reg_time);
            }
            // Validation first so a bad invocation never needs upstream settings.
            request.validate_for(operation)?;
            let soap = UpstreamSettings::from(upstream).into_soap_config()?;
            let handle = UpstreamHandle::new(soap);
            let data =
                runtime()?.block_on(booking::dispatch_request(&handle, operation, &request))?;
            emit_json(data);
            Ok(())
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, Error> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start runtime")
                .with_source(err)
        })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn emit_version_output() {
    if io::stdout().is_terminal() {
        println!("slotproxy {}", env!("CARGO_PKG_VERSION"));
    } else {
        emit_json(json!({
            "name": "slotproxy",
            "version": env!("CARGO_PKG_VERSION"),
        }));
    }
}

fn emit_json(value: Value) {
    let encoded = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    };
    let json = encoded.unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

const RED: &str = "31";
const YELLOW: &str = "33";

fn paint(label: &str, code: &str, enabled: bool) -> String {
    if enabled {
        format!("\u{1b}[{code}m{label}\u{1b}[0m")
    } else {
        label.to_string()
    }
}

/// Flattened view of an `Error` shared by the JSON and terminal renderings.
#[derive(Serialize)]
struct ErrorReport {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    causes: Vec<String>,
}

impl ErrorReport {
    fn from_error(err: &Error) -> Self {
        let fallback = match err.kind() {
            ErrorKind::Internal => "internal error",
            ErrorKind::Usage => "usage error",
            ErrorKind::Validation => "invalid request",
            ErrorKind::Business => "rejected by the booking service",
            ErrorKind::Transport => "upstream call failed",
            ErrorKind::Decode => "invalid upstream response",
            ErrorKind::Io => "i/o error",
        };
        let causes = std::iter::successors(StdError::source(err), |&cause| cause.source())
            .map(ToString::to_string)
            .collect();
        Self {
            kind: format!("{:?}", err.kind()),
            message: err.message().unwrap_or(fallback).to_string(),
            hint: err.hint().map(str::to_string),
            stage: err.stage().map(|stage| stage.to_string()),
            causes,
        }
    }

    fn to_json(&self) -> Value {
        json!({ "error": self })
    }

    fn to_text(&self, use_color: bool) -> String {
        let mut lines = vec![format!("{} {}", paint("error:", RED, use_color), self.message)];
        let details = [
            ("hint:", self.hint.as_deref()),
            ("stage:", self.stage.as_deref()),
            ("caused by:", self.causes.first().map(String::as_str)),
        ];
        for (label, value) in details {
            if let Some(value) = value {
                lines.push(format!("{} {value}", paint(label, YELLOW, use_color)));
            }
        }
        lines.join("\n")
    }
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let report = ErrorReport::from_error(err);
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", report.to_text(color_mode.use_color(is_tty)));
    } else {
        eprintln!("{}", report.to_json());
    }
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.strip_prefix("error:").unwrap_or(line).trim().to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

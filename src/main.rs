use clap::Parser;
use darkroom::config;
use darkroom::registry;
use darkroom::server::{Server, ServerError};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Exit statuses for startup failures.
mod exit {
    pub const MISSING_ARGS: u8 = 1;
    pub const BAD_PORT: u8 = 2;
    pub const PORT_OUT_OF_RANGE: u8 = 3;
    pub const BAD_HOST: u8 = 4;
    pub const ADDR_IN_USE: u8 = 5;
    pub const PERMISSION_DENIED: u8 = 6;
    pub const IO: u8 = 7;
    pub const CONFIG: u8 = 8;
    pub const USAGE: u8 = 64;
}

#[derive(Parser)]
#[command(name = "darkroom")]
#[command(version)]
#[command(about = "HTTP service for declarative image transformations")]
#[command(long_about = "\
HTTP service for declarative image transformations

Endpoints:

  GET  /         the configured reference image (image/jpeg)
  POST /         {\"img\": \"<base64>\", \"<Directive>\": <params>, ...}
                 → {\"processed_image\": \"<base64 jpeg>\"}
  GET  /stream   processed frames as multipart/x-mixed-replace

Directives are applied in a fixed canonical order no matter how the payload
orders them. Run 'darkroom --list-directives' to see them with their
parameters, and 'darkroom --print-config' for a documented config file.

Log verbosity follows RUST_LOG (default: info).")]
struct Cli {
    /// Address to listen on
    host: Option<String>,

    /// Port to listen on (1-65535)
    #[arg(allow_hyphen_values = true)]
    port: Option<String>,

    /// Config file; repeat to layer, later files win
    #[arg(long = "config", value_name = "FILE")]
    configs: Vec<PathBuf>,

    /// Print every directive in canonical order and exit
    #[arg(long)]
    list_directives: bool,

    /// Print a stock config file with all options documented and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::SUCCESS
                }
                _ => ExitCode::from(exit::USAGE),
            };
        }
    };

    if cli.list_directives {
        for spec in registry::operations() {
            println!("{spec}");
        }
        return ExitCode::SUCCESS;
    }
    if cli.print_config {
        print!("{}", config::stock_config_toml());
        return ExitCode::SUCCESS;
    }

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let (Some(host), Some(port)) = (cli.host, cli.port) else {
        eprintln!("usage: darkroom <host> <port> [--config FILE]...");
        return ExitCode::from(exit::MISSING_ARGS);
    };
    let port = match parse_port(&port) {
        Ok(port) => port,
        Err(code) => {
            eprintln!("invalid port '{port}': expected an integer in 1-65535");
            return ExitCode::from(code);
        }
    };

    let config = match config::load_config(&cli.configs) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(exit::CONFIG);
        }
    };

    let server = match Server::bind(&host, port, &config) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(bind_exit_code(&e));
        }
    };
    match server.spawn() {
        Ok(handle) => {
            handle.join();
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(exit::IO)
        }
    }
}

fn parse_port(raw: &str) -> Result<u16, u8> {
    let value: i64 = raw.trim().parse().map_err(|_| exit::BAD_PORT)?;
    match u16::try_from(value) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(exit::PORT_OUT_OF_RANGE),
    }
}

fn bind_exit_code(err: &ServerError) -> u8 {
    match err {
        ServerError::InvalidAddress(_) => exit::BAD_HOST,
        ServerError::Bind { source, .. } => match source.kind() {
            io::ErrorKind::AddrInUse => exit::ADDR_IN_USE,
            io::ErrorKind::PermissionDenied => exit::PERMISSION_DENIED,
            _ => exit::IO,
        },
        ServerError::Spawn(_) | ServerError::Io(_) => exit::IO,
    }
}

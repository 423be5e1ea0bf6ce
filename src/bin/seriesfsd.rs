//! # SeriesFS Server Entry Point
//!
//! Serves a directory of MetaSpace files over the SeriesFS transport.
//!
//! ## Usage
//!
//! ```bash
//! # Serve ./store on the default port
//! seriesfsd ./store
//!
//! # Custom port and worker count, V1 clients only
//! seriesfsd ./store --port 9000 --workers 4 --v1
//! ```
//!
//! Log verbosity follows `RUST_LOG` and defaults to `info`.

use eyre::{bail, Result, WrapErr};
use seriesfs::config::DEFAULT_PORT;
use seriesfs::{FileService, MetaSpaceConfig, ProtocolVersion, Server, ServerConfig};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: Option<&String>) -> Result<T> {
    let Some(value) = value else {
        bail!("{} requires a value", flag);
    };
    match value.parse() {
        Ok(n) => Ok(n),
        Err(_) => bail!("Invalid value for {}: {}", flag, value),
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let mut root: Option<PathBuf> = None;
    let mut port = DEFAULT_PORT;
    let mut config = ServerConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--version" | "-v" => {
                println!("seriesfsd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--port" | "-p" => {
                i += 1;
                port = parse_number("--port", args.get(i))?;
            }
            "--workers" | "-w" => {
                i += 1;
                config.workers = parse_number("--workers", args.get(i))?;
                if config.workers == 0 {
                    bail!("--workers must be at least 1");
                }
            }
            "--v1" => {
                config = config.with_max_version(ProtocolVersion::V1);
            }
            arg if arg.starts_with('-') => {
                bail!("Unknown option: {}", arg);
            }
            path => {
                if root.is_some() {
                    bail!("Multiple root directories specified");
                }
                root = Some(PathBuf::from(path));
            }
        }
        i += 1;
    }

    let Some(root) = root else {
        print_usage();
        return Ok(());
    };

    init_logging();

    let service = FileService::new(&root, MetaSpaceConfig::default())
        .wrap_err_with(|| format!("failed to open root {:?}", root))?;
    let handle = Server::start(("0.0.0.0", port), config, service)
        .wrap_err_with(|| format!("failed to listen on port {}", port))?;

    handle.wait();
    Ok(())
}

fn print_usage() {
    println!("seriesfsd - SeriesFS file server");
    println!();
    println!("USAGE:");
    println!("    seriesfsd [OPTIONS] <ROOT>");
    println!();
    println!("ARGS:");
    println!("    <ROOT>             Directory holding the served files");
    println!();
    println!("OPTIONS:");
    println!("    -p, --port <N>     TCP port (default {})", DEFAULT_PORT);
    println!("    -w, --workers <N>  Worker threads");
    println!("        --v1           Speak protocol V1 only");
    println!("    -h, --help         Print help information");
    println!("    -v, --version      Print version information");
}

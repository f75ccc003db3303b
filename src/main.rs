use lineterm::config::Config;
use lineterm::errors::ClientError;
use lineterm::events::{error_line, status_line};
use lineterm::session::{Connection, Session};

use std::process::ExitCode;

const VERSION: &str = env!("CARGO_PKG_VERSION");

struct Args {
    host: String,
    port: Option<u16>,
    config_path: String,
}

/// Lineterm entry point
fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(Some(args)) => args,
        Ok(None) => return ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}", message);
            print_usage();
            return ExitCode::from(2);
        }
    };

    let config = match Config::load_from_file(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            error_line(&format!("Config error: {}", e));
            return ExitCode::from(2);
        }
    };

    let port = args.port.unwrap_or(config.connection.default_port);
    status_line(&format!("Connecting to {}:{}", args.host, port));

    let conn = match Connection::connect(&args.host, port, &config) {
        Ok(conn) => conn,
        Err(e) => {
            error_line(&format!("Connection failed: {}", e));
            return ExitCode::from(1);
        }
    };
    status_line("Connected");

    let mut session = Session::new(conn, config);
    match session.run() {
        Ok(()) => {
            status_line("Session ended");
            ExitCode::SUCCESS
        }
        Err(ClientError::ConnectionClosed) => {
            status_line("Connection closed by remote host");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error_line(&format!("Fatal error: {}", e));
            ExitCode::from(3)
        }
    }
}

fn parse_args() -> Result<Option<Args>, String> {
    let mut host = None;
    let mut port = None;
    let mut config_path = "lineterm.conf".to_string();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                return Ok(None);
            }
            "-v" | "--version" => {
                println!("lineterm {}", VERSION);
                return Ok(None);
            }
            "-c" => {
                config_path = args
                    .next()
                    .ok_or_else(|| "-c requires a file argument".to_string())?;
            }
            value if host.is_none() => host = Some(value.to_string()),
            value if port.is_none() => {
                port = Some(
                    value
                        .parse::<u16>()
                        .map_err(|_| format!("invalid port: {}", value))?,
                );
            }
            value => return Err(format!("unexpected argument: {}", value)),
        }
    }

    match host {
        Some(host) => Ok(Some(Args {
            host,
            port,
            config_path,
        })),
        None => Err("missing host".to_string()),
    }
}

fn print_usage() {
    println!("usage: lineterm <host> [port] [-c CONFIG]");
    println!("       lineterm -h | --help");
    println!("       lineterm -v | --version");
}

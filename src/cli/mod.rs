mod init;
mod satellite;
mod serve;

use anyhow::Result;
use console::style;
use std::path::PathBuf;

use crate::core::terminal::{self, GuideSection, print_error};

fn print_help() {
    terminal::print_banner("job and trigger orchestration for pull-based agents");

    GuideSection::new("Control plane")
        .command("serve", "Run the control plane API, scheduler and agent sweep")
        .command("init", "Write a default control plane config")
        .print();

    GuideSection::new("Agents")
        .command("satellite", "Run an agent against a control plane")
        .command("init --satellite", "Write a default satellite config")
        .print();

    GuideSection::new("Options")
        .text("--config <path>     Config file (default: under the data directory)")
        .text("--api-host <host>   Override server.host (serve)")
        .text("--api-port <port>   Override server.port (serve)")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("ingest-control").green()
    );
}

pub(crate) fn parse_api_server_flags(
    args: &[String],
    start: usize,
    mut api_host: String,
    mut api_port: u16,
) -> (String, u16) {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--api-port" => {
                if i + 1 < args.len() {
                    api_port = args[i + 1].parse().unwrap_or(api_port);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-host" => {
                if i + 1 < args.len() {
                    api_host = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    (api_host, api_port)
}

pub(crate) fn parse_config_flag(args: &[String], start: usize) -> Option<PathBuf> {
    let mut config = None;
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    config
}

pub(crate) fn has_flag(args: &[String], start: usize, flag: &str) -> bool {
    args.iter().skip(start).any(|a| a == flag)
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or("help");
    match cmd {
        "serve" => serve::run_serve(&args).await,
        "satellite" => satellite::run_satellite(&args).await,
        "init" => init::run_init(&args).await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_error(&format!("Unknown command '{}'.", other));
            print_help();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn api_flags_override_defaults() {
        let argv = args(&["ingest-control", "serve", "--api-port", "18000", "--api-host", "0.0.0.0"]);
        assert_eq!(
            parse_api_server_flags(&argv, 2, "127.0.0.1".into(), 17900),
            ("0.0.0.0".to_string(), 18000)
        );
    }

    #[test]
    fn bad_or_missing_port_keeps_current() {
        let argv = args(&["ingest-control", "serve", "--api-port", "nope"]);
        assert_eq!(
            parse_api_server_flags(&argv, 2, "127.0.0.1".into(), 17900),
            ("127.0.0.1".to_string(), 17900)
        );
        let argv = args(&["ingest-control", "serve", "--api-port"]);
        assert_eq!(parse_api_server_flags(&argv, 2, "h".into(), 1).1, 1);
    }

    #[test]
    fn config_flag_and_switches() {
        let argv = args(&["ingest-control", "init", "--satellite", "-c", "/tmp/sat.toml"]);
        assert_eq!(parse_config_flag(&argv, 2), Some(PathBuf::from("/tmp/sat.toml")));
        assert!(has_flag(&argv, 2, "--satellite"));
        assert!(!has_flag(&argv, 3, "--satellite"));
        assert_eq!(parse_config_flag(&args(&["ingest-control", "serve"]), 2), None);
    }
}

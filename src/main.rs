//! rail-engine CLI
//!
//! Exercise the rail engine from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Run a random rail workload and print a report
//! rail-engine simulate --parties 10 --rails 20 --steps 500
//!
//! # Same, as JSON
//! rail-engine simulate --seed 7 --format json
//!
//! # Validate an engine config file and print the effective values
//! rail-engine config --input engine.json
//! ```

use log::error;
use rail_engine::core::config::EngineConfig;
use rail_engine::simulation::workload::{run_workload, WorkloadConfig};
use std::fs;
use std::process;

fn print_usage() {
    eprintln!(
        r#"rail-engine — continuous payment rail settlement

USAGE:
    rail-engine <COMMAND> [OPTIONS]

COMMANDS:
    simulate    Run a random rail workload against an in-memory ledger
    config      Validate an engine config file
    help        Show this message

OPTIONS (simulate):
    --parties <N>       Number of parties (default: 10)
    --rails <N>         Number of rails to open (default: 20)
    --steps <N>         Operations after opening (default: 500)
    --seed <N>          RNG seed (default: 42)
    --format <FORMAT>   Output format: text (default) or json

OPTIONS (config):
    --input <FILE>      Path to a JSON engine config

EXAMPLES:
    rail-engine simulate --parties 50 --rails 200 --steps 5000
    rail-engine simulate --seed 7 --format json
    rail-engine config --input engine.json"#
    );
}

fn option_value<'a>(args: &'a [String], i: usize, flag: &str, expects: &str) -> &'a str {
    args.get(i).map(String::as_str).unwrap_or_else(|| {
        eprintln!("{} requires {}", flag, expects);
        process::exit(1);
    })
}

fn parse_number<T: std::str::FromStr>(value: &str, flag: &str) -> T {
    value.parse().unwrap_or_else(|_| {
        eprintln!("{} requires a number, got '{}'", flag, value);
        process::exit(1);
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        eprintln!("Error serializing output: {}", e);
        process::exit(1);
    })
}

fn cmd_simulate(args: &[String]) {
    let mut config = WorkloadConfig::default();
    let mut format = "text".to_string();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        i += 1;
        match flag {
            "--parties" => {
                config.party_count = parse_number(option_value(args, i, flag, "a number"), flag)
            }
            "--rails" => {
                config.rail_count = parse_number(option_value(args, i, flag, "a number"), flag)
            }
            "--steps" => config.steps = parse_number(option_value(args, i, flag, "a number"), flag),
            "--seed" => config.seed = parse_number(option_value(args, i, flag, "a number"), flag),
            "--format" => format = option_value(args, i, flag, "'text' or 'json'").to_string(),
            _ => {
                eprintln!("Unknown option: {}", flag);
                process::exit(1);
            }
        }
        i += 1;
    }

    let report = run_workload(&config).unwrap_or_else(|e| {
        error!("workload aborted: {}", e);
        eprintln!("Workload aborted: {}", e);
        process::exit(1);
    });

    if format == "json" {
        println!("{}", to_json(&report));
    } else {
        println!("{}", report);
    }
    if !report.is_conserved() {
        process::exit(2);
    }
}

fn cmd_config(args: &[String]) {
    let mut input_path = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--input" => {
                i += 1;
                input_path = Some(option_value(args, i, "--input", "a file path").to_string());
            }
            other => {
                eprintln!("Unknown option: {}", other);
                process::exit(1);
            }
        }
        i += 1;
    }

    let path = input_path.unwrap_or_else(|| {
        eprintln!("Error: --input <FILE> is required");
        process::exit(1);
    });
    let content = fs::read_to_string(&path).unwrap_or_else(|e| {
        eprintln!("Error reading file '{}': {}", path, e);
        process::exit(1);
    });
    let config = EngineConfig::from_json_str(&content).unwrap_or_else(|e| {
        eprintln!("{}", e);
        process::exit(1);
    });
    println!("{}", to_json(&config));
}

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = args[1].as_str();
    let rest = &args[2..];

    match command {
        "simulate" => cmd_simulate(rest),
        "config" => cmd_config(rest),
        "help" | "--help" | "-h" => print_usage(),
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            process::exit(1);
        }
    }
}

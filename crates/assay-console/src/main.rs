//! Assay console driver
//!
//! Runs the cache headless: `simulate` bulk-loads a synthetic analyzer run
//! and replays random update batches, `config` prints the effective
//! configuration.

use anyhow::Context;
use assay_cache::CacheConfig;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod simulate;

use simulate::{run_simulation, SimulateArgs};

fn cli() -> Command {
    Command::new("assay-console")
        .version(assay_cache::VERSION)
        .about("Sample and test-item cache driver")
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .default_value("info")
                .help("Log filter used when RUST_LOG is unset"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Load a synthetic run and replay random updates")
                .arg(
                    Arg::new("samples")
                        .long("samples")
                        .default_value("100")
                        .value_parser(value_parser!(i64).range(0..))
                        .help("Samples in the initial load"),
                )
                .arg(
                    Arg::new("items-per-sample")
                        .long("items-per-sample")
                        .default_value("4")
                        .value_parser(value_parser!(i64).range(0..1000))
                        .help("Test items per sample in the initial load"),
                )
                .arg(
                    Arg::new("updates")
                        .long("updates")
                        .default_value("1000")
                        .value_parser(value_parser!(usize))
                        .help("Random update batches to apply"),
                )
                .arg(
                    Arg::new("ticks")
                        .long("ticks")
                        .default_value("10")
                        .value_parser(value_parser!(u32))
                        .help("One-second countdown ticks to run afterwards"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML configuration file"),
                )
                .arg(
                    Arg::new("verify")
                        .long("verify")
                        .action(ArgAction::SetTrue)
                        .help("Check structural consistency after every batch"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration as TOML")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML configuration file"),
                ),
        )
}

fn init_tracing(matches: &ArgMatches) {
    let level = matches
        .get_one::<String>("log-level")
        .map_or("info", String::as_str);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if matches.get_flag("json-logs") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &ArgMatches) -> anyhow::Result<CacheConfig> {
    match args.get_one::<PathBuf>("config") {
        Some(path) => CacheConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(CacheConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(&matches);

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let config = load_config(args)?;
            let sim = SimulateArgs {
                samples: args.get_one::<i64>("samples").copied().unwrap_or(100),
                items_per_sample: args.get_one::<i64>("items-per-sample").copied().unwrap_or(4),
                updates: args.get_one::<usize>("updates").copied().unwrap_or(1000),
                ticks: args.get_one::<u32>("ticks").copied().unwrap_or(10),
                seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
                verify: args.get_flag("verify"),
            };

            println!("Running cache simulation...");
            println!("Samples: {}", sim.samples);
            println!("Items per sample: {}", sim.items_per_sample);
            println!("Updates: {}", sim.updates);
            println!("Ticks: {}", sim.ticks);
            println!("Seed: {}", sim.seed);
            println!("Verify: {}", sim.verify);
            println!();

            let report = run_simulation(config, &sim).await?;
            println!("{}", report.generate_text());

            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("config", args)) => {
            let config = load_config(args)?;
            print!("{}", config.to_toml_string());
        }
        _ => {
            cli().print_help()?;
            println!();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn simulate_defaults_parse() {
        let matches = cli().get_matches_from(["assay-console", "simulate", "--verify"]);
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "simulate");
        assert_eq!(args.get_one::<i64>("samples"), Some(&100));
        assert!(args.get_flag("verify"));
    }

    #[test]
    fn negative_sample_count_is_rejected() {
        let result = cli().try_get_matches_from(["assay-console", "simulate", "--samples", "-3"]);
        assert!(result.is_err());
    }
}

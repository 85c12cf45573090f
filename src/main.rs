//! censusbuddy - cached Census API queries and TIGER boundary downloads
//!
//! Tabular results are written to stdout as CSV; diagnostics go to stderr.

use std::error::Error;
use std::io::{self, Write};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use censusbuddy::census::CensusClient;
use censusbuddy::cli::{Cli, Command, FipsCommand};
use censusbuddy::data::Table;
use censusbuddy::geo::GeoReference;
use censusbuddy::tiger::TigerDownloader;

/// Installs the stderr log subscriber; `RUST_LOG` wins over `--verbose`
fn init_tracing(verbose: bool) {
    let default = if verbose { "censusbuddy=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(io::stderr)
        .init();
}

fn print_table(table: &Table) -> Result<(), Box<dyn Error>> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    table.write_csv(&mut out, false)?;
    out.flush()?;
    Ok(())
}

fn print_lines<I: IntoIterator<Item = S>, S: AsRef<str>>(lines: I) -> Result<(), Box<dyn Error>> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in lines {
        writeln!(out, "{}", line.as_ref())?;
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    match &cli.command {
        Command::Query(args) => {
            let config = cli.census_config(&args.dataset.dataset, true)?;
            let mut client = CensusClient::open(config).await?;
            let table = client.query(&args.to_request()).await?;
            print_table(&table)
        }

        Command::Vars(args) => {
            let mut client = CensusClient::open(cli.census_config(&args.dataset.dataset, false)?).await?;
            if args.refresh_metadata {
                client.refresh_metadata().await?;
            }
            let mut ids = args.ids.clone();
            if let Some(pattern) = &args.search {
                ids.extend(client.search_vars(pattern)?);
            } else if ids.is_empty() {
                ids = client.search_vars("")?;
            }
            let selected = client.get_vars(&ids);

            let mut writer = csv::Writer::from_writer(io::stdout());
            writer.write_record(["name", "label", "concept", "predicateType"])?;
            for (name, info) in selected {
                writer.write_record([
                    name.as_str(),
                    info.label.as_deref().unwrap_or(""),
                    info.concept.as_deref().unwrap_or(""),
                    info.predicate_type.as_deref().unwrap_or(""),
                ])?;
            }
            writer.flush()?;
            Ok(())
        }

        Command::Geography(args) => {
            let client = CensusClient::open(cli.census_config(&args.dataset, false)?).await?;
            let rules = client.geo_parameter_chart().await?;
            let mut writer = csv::Writer::from_writer(io::stdout());
            writer.write_record(["level", "requires"])?;
            for level in rules.levels() {
                for combo in &level.requires {
                    writer.write_record([level.name.as_str(), combo.join(" ").as_str()])?;
                }
            }
            writer.flush()?;
            Ok(())
        }

        Command::Tiger(args) => {
            let config = cli
                .tiger_config(args.ftp)?
                .with_converter(&args.converter)
                .with_dry_run(args.dry_run);
            let downloader = TigerDownloader::new(config)?;
            let request = args.to_request();
            let table = downloader.query(&request, args.simplify, !args.no_cache).await?;
            if args.dry_run {
                print_lines([
                    downloader.archive_path(&request).display().to_string(),
                    downloader.geojson_path(&request).display().to_string(),
                ])
            } else {
                print_table(&table)
            }
        }

        Command::TigerList { year, ftp } => {
            let downloader = TigerDownloader::new(cli.tiger_config(*ftp)?)?;
            print_lines(downloader.list(*year).await?)
        }

        Command::Fips {
            reference_dir,
            lookup,
        } => {
            let geo = match reference_dir {
                Some(dir) => GeoReference::from_dir(dir)?,
                None => GeoReference::embedded()?,
            };
            let answer = match lookup {
                FipsCommand::State { pattern, reverse: true } => geo.fips_state(pattern)?,
                FipsCommand::State { pattern, reverse: false } => geo.state_fips(pattern)?,
                FipsCommand::County { state, pattern } => geo.county_fips(state, pattern)?,
                FipsCommand::Cousub {
                    state,
                    county,
                    pattern,
                } => geo.cousub_fips(state, county, pattern)?,
                FipsCommand::Entity { entity } => geo.entity_to_census(entity)?,
            };
            print_lines([answer])
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

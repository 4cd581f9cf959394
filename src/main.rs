mod aggregator;
mod analyzer;
mod classifier;
mod error;
mod models;
mod regroup;
mod sectors;
mod source;

use aggregator::WideTable;
use analyzer::{HealthAnalyzer, HealthParams, Report};
use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use classifier::CovidMatcher;
use log::{info, warn};
use models::{Column, Config, DataSourceMode, FlowTable, KeyValue};
use regroup::{MapLookup, RegionOverrides};
use sectors::HealthSectors;
use source::{CsvFlowSource, Downloader, Indicator};
use std::fs;
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Warn)
        .filter_module("health_oda", log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let matches = Command::new("health-oda")
        .version("1.0")
        .about("Summarises health ODA flows with and without COVID-19 spending")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("report")
                .short('r')
                .long("report")
                .value_name("NAME")
                .action(ArgAction::Append)
                .help("Report to build: totals, donors, recipients or covid_audit (repeatable)"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Output directory, overrides the configuration"),
        )
        .get_matches();

    let config_file = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("config.toml");

    // Load or create configuration
    let config = if Path::new(config_file).exists() {
        println!("📋 Loading configuration from: {}", config_file);
        Config::load_from_file(config_file)
            .with_context(|| format!("Failed to load configuration: {}", config_file))?
    } else {
        println!("📝 Creating default configuration file: {}", config_file);
        Config::default().save_to_file(config_file)?;
        println!(
            "⚠️  Please review {} (years, prices, donors, data directory), then run the program again.",
            config_file
        );
        return Ok(());
    };

    let report_names: Vec<String> = match matches.get_many::<String>("report") {
        Some(values) => values.cloned().collect(),
        None => config.reports.clone(),
    };
    let reports = report_names
        .iter()
        .map(|name| name.parse::<Report>())
        .collect::<Result<Vec<_>, _>>()?;

    let data_dir = PathBuf::from(config.data_directory.as_deref().unwrap_or("raw_data"));
    let output_dir = matches
        .get_one::<String>("output")
        .cloned()
        .or_else(|| config.output_directory.clone())
        .unwrap_or_else(|| "output".to_string());
    let output_dir = PathBuf::from(output_dir);

    fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

    println!(
        "🔍 Analyzing health ODA {}-{} ({} prices, {}{})",
        config.start_year,
        config.end_year,
        config.prices,
        config.currency,
        config
            .base_year
            .map(|y| format!(", base year {}", y))
            .unwrap_or_default()
    );
    println!("📂 Reading indicator files from: {}", data_dir.display());
    println!("📄 Output directory: {}", output_dir.display());

    fetch_remote_data(&config, &data_dir).await?;

    // Initialize components
    let source = CsvFlowSource::new(&data_dir);
    let matcher = CovidMatcher::new(&config.covid)?;
    let sectors = HealthSectors::new(config.include_covid_response_sectors);
    info!(
        "{} health purpose codes selected (COVID-19 response sectors {})",
        sectors.len(),
        if config.include_covid_response_sectors { "included" } else { "excluded" }
    );
    let analyzer = HealthAnalyzer::new(&source, matcher, sectors, HealthParams::from_config(&config));

    let mut summaries = Vec::new();
    for report in reports {
        println!("\n🎯 Building {} report...", report.name());
        let written = match report {
            Report::Totals => {
                let table = fill_missing(analyzer.totals_by_year()?, &config);
                let path = output_dir.join(format!("health_{}.csv", config.prices));
                write_wide_csv(&table, &path)?;
                summaries.push((report, table));
                vec![path]
            }
            Report::Donors => {
                let table = fill_missing(
                    analyzer.donor_totals(&config.donors, &config.donor_name_table())?,
                    &config,
                );
                let paths = generate_donor_csvs(&table, &config, &output_dir)?;
                summaries.push((report, table));
                paths
            }
            Report::Recipients => {
                let schemes = config.schemes()?;
                let lookup = load_code_lookup(&config)?;
                let overrides = RegionOverrides::from_config(&config.region_overrides);
                let table = analyzer.recipient_groupings(
                    &schemes,
                    &lookup,
                    &overrides,
                    &config.recipient_labels,
                )?;
                let table = fill_missing(table, &config);
                let path = output_dir.join(format!("health_by_recipient_income_{}.csv", config.prices));
                write_wide_csv(&table, &path)?;
                summaries.push((report, table));
                vec![path]
            }
            Report::CovidAudit => {
                let table = analyzer.covid_audit(config.audit_donor)?;
                let path = output_dir.join(format!(
                    "covid_audit_{}_{}.csv",
                    config.audit_donor, config.prices
                ));
                write_flow_csv(&table, &path)?;
                if table.is_empty() {
                    println!("   ❓ No COVID-19 flows flagged for donor {}", config.audit_donor);
                } else {
                    println!(
                        "   🦠 {} flagged records, {:.2} in total",
                        table.len(),
                        table.total_value()
                    );
                }
                vec![path]
            }
        };
        for path in written {
            println!("   ✅ Wrote {}", path.display());
        }
    }

    print_summary(&summaries);

    println!("\n✅ Analysis complete!");
    println!("📂 Results: {}", output_dir.display());
    Ok(())
}

/// Download indicator files when the configuration asks for remote data.
/// In `both` mode a failed download falls back to whatever is already on disk.
async fn fetch_remote_data(config: &Config, data_dir: &Path) -> Result<()> {
    if config.data_source_mode == DataSourceMode::Local {
        return Ok(());
    }

    let Some(base_url) = config.base_url.as_deref() else {
        if config.data_source_mode == DataSourceMode::Internet {
            anyhow::bail!("data_source_mode is \"internet\" but base_url is not set");
        }
        warn!("no base_url configured, using local files only");
        return Ok(());
    };

    let downloader = Downloader::new(base_url);
    for indicator in [
        Indicator::BilateralDisbursement,
        Indicator::ImputedMultilateralDisbursement,
    ] {
        match downloader.download(indicator, data_dir).await {
            Ok(path) => println!("   ✅ Downloaded {}", path.display()),
            Err(e) if config.data_source_mode == DataSourceMode::Both => {
                println!("   ⚠️  Download failed for {}: {}", indicator.name(), e);
                warn!("falling back to local copy of {}", indicator.name());
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to download {}", indicator.name())))
            }
        }
    }
    Ok(())
}

fn load_code_lookup(config: &Config) -> Result<MapLookup> {
    let Some(file) = config.code_lookup_file.as_deref() else {
        return Ok(MapLookup::new());
    };
    let path = Path::new(file);
    if !path.exists() {
        println!("   ⚠️  Code lookup file {} not found, only manual overrides apply", file);
        return Ok(MapLookup::new());
    }
    MapLookup::from_path(path).with_context(|| format!("Failed to read code lookup: {}", file))
}

fn generate_donor_csvs(table: &WideTable, config: &Config, output_dir: &Path) -> Result<Vec<PathBuf>> {
    if !config.export_by_donor {
        let path = output_dir.join("bi_plus_multi_health_spending_multiple_donors.csv");
        write_wide_csv(table, &path)?;
        return Ok(vec![path]);
    }

    let mut paths = Vec::new();
    for (donor, part) in table.partition_by(Column::DonorName) {
        let donor = match donor {
            KeyValue::Null => "unnamed".to_string(),
            other => other.to_string(),
        };
        let path = output_dir.join(format!("{}_total_health_{}.csv", donor, config.prices));
        write_wide_csv(&part, &path)?;
        paths.push(path);
    }
    Ok(paths)
}

fn fill_missing(table: WideTable, config: &Config) -> WideTable {
    if config.fill_missing_with_zero {
        table.fill_missing(0.0)
    } else {
        table
    }
}

/// Write a pivoted table; missing cells are left empty. Existing files are overwritten.
fn write_wide_csv(table: &WideTable, path: &Path) -> Result<()> {
    use csv::Writer;

    let mut writer = Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writer.write_record(table.header())?;

    for row in &table.rows {
        let record: Vec<String> = row
            .keys
            .iter()
            .map(|k| k.to_string())
            .chain(
                row.cells
                    .iter()
                    .map(|c| c.map(|v| v.to_string()).unwrap_or_default()),
            )
            .collect();
        writer.write_record(&record)?;
    }

    writer.flush()?;
    info!("wrote {} rows to {}", table.rows.len(), path.display());
    Ok(())
}

/// Write flow records with their schema columns in export order, then `value`.
fn write_flow_csv(table: &FlowTable, path: &Path) -> Result<()> {
    use csv::Writer;

    let columns: Vec<Column> = Column::ALL
        .iter()
        .copied()
        .filter(|c| table.has_column(*c))
        .collect();

    let mut writer = Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut header: Vec<&str> = columns.iter().map(Column::name).collect();
    header.push("value");
    writer.write_record(&header)?;

    for record in &table.records {
        let mut row: Vec<String> = columns.iter().map(|c| record.get(*c).to_string()).collect();
        row.push(record.value.to_string());
        writer.write_record(&row)?;
    }

    writer.flush()?;
    info!("wrote {} records to {}", table.len(), path.display());
    Ok(())
}

fn print_summary(summaries: &[(Report, WideTable)]) {
    println!("\n📊 SUMMARY");
    println!("==========");

    for (report, table) in summaries {
        println!("\n📈 {} ({} rows):", report.name(), table.rows.len());
        if table.is_empty() {
            println!("   ❓ No health flows found for the selected years");
            continue;
        }
        for indicator in &table.indicators {
            println!("   {} - {:.2}", indicator, table.indicator_total(indicator));
        }
    }
}

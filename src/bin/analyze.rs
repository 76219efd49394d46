#![cfg(not(tarpaulin_include))]

use clap::Parser;
use datavis::insights::{AnomalyMethod, InsightsConfig, InsightsEngine};
use datavis::loader::load_file;
use datavis::schema::{SchemaConfig, infer_schema};
use datavis::table::Table;
use std::path::PathBuf;

/// Prints the data-quality report of a local CSV or XLSX file as JSON
#[derive(Parser)]
#[command(name = "datavis-analyze")]
#[command(version)]
struct Cli {
    /// File to analyze
    path: PathBuf,

    /// Distinct-to-rows ratio under which a text column is categorical
    #[arg(long, default_value_t = 0.7)]
    categorical_ratio: f64,

    /// Standard deviations beyond which a numeric value is an anomaly
    /// (`leave-one-out` method)
    #[arg(long, default_value_t = 2.0)]
    anomaly_k: f64,

    /// Modified z-score beyond which a numeric value is an anomaly
    #[arg(long, default_value_t = 3.5)]
    anomaly_z_threshold: f64,

    /// Outlier rule for numeric columns
    #[arg(long, value_enum, default_value_t = AnomalyMethod::ModifiedZScore)]
    anomaly_method: AnomalyMethod,

    /// Print the schema along with the report
    #[arg(long)]
    schema: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let upload = load_file(&cli.path)?;
    let schema_config = SchemaConfig {
        categorical_ratio: cli.categorical_ratio,
        ..SchemaConfig::default()
    };
    let (columns, rows) = infer_schema(&upload.headers, upload.rows, &schema_config);
    let table = Table::new(upload.table_name, columns, rows, "local");

    let engine = InsightsEngine::new(InsightsConfig {
        anomaly_k: cli.anomaly_k,
        modified_z_threshold: cli.anomaly_z_threshold,
        anomaly_method: cli.anomaly_method,
        ..InsightsConfig::default()
    });
    let report = engine.analyze(&table);

    let output = if cli.schema {
        serde_json::json!({ "schema": table.columns, "report": report })
    } else {
        serde_json::to_value(&report)?
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

use chrono::{FixedOffset, Local};
use clap::Parser;
use ecotrack::client::ApiClient;
use ecotrack::history::format_series;
use ecotrack::model::ChartRow;
use std::time::Duration;

/// Print a station's historical readings as chart rows (JSON).
#[derive(Parser, Debug)]
#[command(name = "station_history", version)]
struct Args {
    /// Station identifier as reported by the data service
    station_id: String,

    /// Gateway API base URL
    #[arg(long, env = "ECOTRACK_API_URL", default_value = "http://localhost:8080/api/v1")]
    api_url: String,

    /// Label buckets in this UTC offset (minutes) instead of the local time zone
    #[arg(long, allow_hyphen_values = true)]
    utc_offset_minutes: Option<i32>,

    #[arg(long, default_value_t = 30)]
    timeout_seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let client = ApiClient::new(&args.api_url, Duration::from_secs(args.timeout_seconds))?;
    let readings = client.station_history(&args.station_id).await?;

    if readings.is_empty() {
        eprintln!("No historical data for station {}", args.station_id);
        return Ok(());
    }

    let rows: Vec<ChartRow> = match args.utc_offset_minutes {
        Some(minutes) => {
            let offset = FixedOffset::east_opt(minutes * 60)
                .ok_or_else(|| anyhow::anyhow!("UTC offset {} minutes is out of range", minutes))?;
            format_series(&readings, &offset).collect()
        }
        None => format_series(&readings, &Local).collect(),
    };

    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

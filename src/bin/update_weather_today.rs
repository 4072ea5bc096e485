use std::{error::Error, path::Path};

use clap::Parser;
use jiff::Timestamp;
use log::info;

use wxload::config::JobConfig;
use wxload::snowflake::credentials::Credentials;
use wxload::snowflake::session::SqlSession;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,
}

/// Run this job every day at 11AM America/New_York (cron `0 11 * * *`).
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let env_file = format!(".env/{}.env", args.env);
    if Path::new(&env_file).exists() {
        dotenvy::from_path(Path::new(&env_file))?;
    }

    let config = JobConfig::from_env()?;
    let archive = config.archive();

    let credentials = Credentials::resolve(&config.connection.connection_name)?;
    let session = SqlSession::connect(&config.connection, &credentials)?;

    let rows = archive.download_forecast()?;
    let today = Timestamp::now().in_tz(&config.timezone)?.date();
    match archive.todays_row(&rows, today) {
        Some(record) => archive.upsert(&session, &record)?,
        None => info!("No forecast row for {} in {}; skipping.", today, config.timezone),
    }

    Ok(())
}

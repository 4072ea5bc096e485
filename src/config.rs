use std::env;

use jiff::tz::TimeZone;

use crate::db::openmeteo::weather_today::WeatherTodayArchive;
use crate::errors::JobError;
use crate::snowflake::session::ConnectionConfig;

/// Everything one run needs, read from the environment at startup.  Optional
/// keys default silently to the reference deployment (Boston, landing into
/// RAW.WEATHER_TODAY); invalid values fail fast.
pub struct JobConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    pub schema: String,
    pub table: String,
    pub connection: ConnectionConfig,
}

impl JobConfig {
    pub fn from_env() -> Result<JobConfig, JobError> {
        let latitude = coord(&env_or("WEATHER_LAT", "42.3601"), "WEATHER_LAT", -90.0, 90.0)?;
        let longitude = coord(&env_or("WEATHER_LON", "-71.0589"), "WEATHER_LON", -180.0, 180.0)?;

        let timezone = env_or("WEATHER_TZ", "America/New_York");
        TimeZone::get(&timezone)
            .map_err(|_| JobError::Config(format!("WEATHER_TZ is not a known timezone: {}", timezone)))?;

        let schema = identifier(&env_or("WEATHER_SCHEMA", "RAW"), "WEATHER_SCHEMA")?;
        let table = identifier(&env_or("WEATHER_TABLE", "WEATHER_TODAY"), "WEATHER_TABLE")?;

        let connection = ConnectionConfig {
            database: identifier(&env_or("SNOWFLAKE_DATABASE", "WEATHER_DB"), "SNOWFLAKE_DATABASE")?,
            schema: schema.clone(),
            warehouse: identifier(&env_or("SNOWFLAKE_WAREHOUSE", "COMPUTE_WH"), "SNOWFLAKE_WAREHOUSE")?,
            connection_name: env_or("SNOWFLAKE_CONNECTION_NAME", "DEFAULT_CONNECTION"),
        };

        Ok(JobConfig {
            latitude,
            longitude,
            timezone,
            schema,
            table,
            connection,
        })
    }

    pub fn archive(&self) -> WeatherTodayArchive {
        WeatherTodayArchive {
            latitude: self.latitude,
            longitude: self.longitude,
            timezone: self.timezone.clone(),
            schema: self.schema.clone(),
            table: self.table.clone(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn coord(raw: &str, key: &str, lo: f64, hi: f64) -> Result<f64, JobError> {
    let value: f64 = raw
        .parse()
        .map_err(|_| JobError::Config(format!("{} is not a number: {}", key, raw)))?;
    if !(lo..=hi).contains(&value) {
        return Err(JobError::Config(format!("{} is out of range: {}", key, raw)));
    }
    Ok(value)
}

/// Uppercase a SQL identifier and reject anything that could not be a plain
/// Snowflake object name, since identifiers are spliced into statements.
fn identifier(raw: &str, key: &str) -> Result<String, JobError> {
    let upper = raw.to_uppercase();
    let mut chars = upper.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !valid {
        return Err(JobError::Config(format!("{} is not a valid identifier: {}", key, raw)));
    }
    Ok(upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_uppercased_and_validated() {
        assert_eq!(identifier("weather_today", "K").unwrap(), "WEATHER_TODAY");
        assert_eq!(identifier("_raw2", "K").unwrap(), "_RAW2");
        assert!(identifier("bad-name", "K").is_err());
        assert!(identifier("2fast", "K").is_err());
        assert!(identifier("", "K").is_err());
        assert!(identifier("drop table; --", "K").is_err());
    }

    #[test]
    fn coords_are_range_checked() {
        assert_eq!(coord("42.3601", "WEATHER_LAT", -90.0, 90.0).unwrap(), 42.3601);
        assert!(coord("91.0", "WEATHER_LAT", -90.0, 90.0).is_err());
        assert!(coord("north", "WEATHER_LAT", -90.0, 90.0).is_err());
    }

    // The only test that touches WEATHER_* environment variables.
    #[test]
    fn from_env_applies_defaults_and_overrides() -> Result<(), JobError> {
        env::set_var("WEATHER_LAT", "40.7128");
        env::set_var("WEATHER_TABLE", "daily_wx");
        env::remove_var("WEATHER_LON");
        env::remove_var("WEATHER_TZ");
        env::remove_var("WEATHER_SCHEMA");
        env::remove_var("SNOWFLAKE_DATABASE");
        env::remove_var("SNOWFLAKE_WAREHOUSE");
        env::remove_var("SNOWFLAKE_CONNECTION_NAME");

        let config = JobConfig::from_env()?;
        assert_eq!(config.latitude, 40.7128);
        assert_eq!(config.longitude, -71.0589);
        assert_eq!(config.timezone, "America/New_York");
        assert_eq!(config.schema, "RAW");
        assert_eq!(config.table, "DAILY_WX");
        assert_eq!(config.connection.database, "WEATHER_DB");
        assert_eq!(config.connection.warehouse, "COMPUTE_WH");
        assert_eq!(config.connection.connection_name, "DEFAULT_CONNECTION");

        env::remove_var("WEATHER_LAT");
        env::remove_var("WEATHER_TABLE");
        Ok(())
    }
}

use std::time::Duration;

use jiff::civil::Date;
use jiff::Timestamp;
use log::info;
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::errors::JobError;
use crate::snowflake::session::SqlSession;

const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const DAILY_FIELDS: &str = "weathercode,temperature_2m_max,temperature_2m_min,precipitation_sum";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Open-Meteo daily forecast landed into one Snowflake table, at most one
/// row per calendar date.  The merge keeps reruns for the same day
/// idempotent.
pub struct WeatherTodayArchive {
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    pub schema: String,
    pub table: String,
}

/// One day of the forecast as returned by the API, still in Celsius.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyRow {
    pub date: Date,
    pub weathercode: i64,
    pub temperature_2m_max: f64,
    pub temperature_2m_min: f64,
    pub precipitation_sum: f64,
}

/// The single row written to the destination table.  Built fresh each run
/// and discarded after the merge.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRecord {
    pub date: Date,
    pub weathercode: i64,
    pub temp_max_f: f64,
    pub temp_min_f: f64,
    pub precipitation_sum: f64,
    pub load_ts_utc: Timestamp,
}

#[derive(Deserialize)]
struct ForecastResponse {
    daily: Option<DailySeries>,
}

// Parallel arrays keyed by `time`.
#[derive(Deserialize)]
struct DailySeries {
    time: Vec<Date>,
    weathercode: Vec<i64>,
    temperature_2m_max: Vec<f64>,
    temperature_2m_min: Vec<f64>,
    precipitation_sum: Vec<f64>,
}

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

impl WeatherTodayArchive {
    /// One GET to the forecast endpoint, 30s timeout.  Not retried; a failed
    /// fetch surfaces and the job runs again on the next schedule tick.
    pub fn download_forecast(&self) -> Result<Vec<DailyRow>, JobError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| JobError::Fetch(e.to_string()))?;
        let response = client
            .get(FORECAST_URL)
            .query(&[
                ("latitude", self.latitude.to_string()),
                ("longitude", self.longitude.to_string()),
                ("daily", DAILY_FIELDS.to_string()),
                ("timezone", self.timezone.clone()),
                ("forecast_days", "1".to_string()),
            ])
            .send()
            .map_err(|e| JobError::Fetch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(JobError::Fetch(format!(
                "{} returned HTTP {}",
                FORECAST_URL,
                response.status()
            )));
        }
        let body = response.text().map_err(|e| JobError::Fetch(e.to_string()))?;
        parse_daily(&body)
    }

    /// The row whose date equals `today`, Fahrenheit-converted and stamped
    /// with the capture time.  `None` when the API has no row for today;
    /// the caller logs and skips, it is not an error.
    pub fn todays_row(&self, rows: &[DailyRow], today: Date) -> Option<ForecastRecord> {
        rows.iter().find(|r| r.date == today).map(|r| ForecastRecord {
            date: r.date,
            weathercode: r.weathercode,
            temp_max_f: celsius_to_fahrenheit(r.temperature_2m_max),
            temp_min_f: celsius_to_fahrenheit(r.temperature_2m_min),
            precipitation_sum: r.precipitation_sum,
            load_ts_utc: Timestamp::now(),
        })
    }

    /// Insert-or-update the record by DATE.  The whole batch runs in one SQL
    /// API request: the staging table is session-scoped so it cannot outlive
    /// the run or be seen by other readers, and the destination is only
    /// mutated by the single MERGE statement.
    pub fn upsert(&self, session: &SqlSession, record: &ForecastRecord) -> Result<(), JobError> {
        session
            .execute_batch(&self.merge_statements(record))
            .map_err(|e| JobError::Persistence(e.to_string()))?;
        info!(
            "Upserted 1 row into {}.{} for {}",
            self.schema, self.table, record.date
        );
        Ok(())
    }

    fn merge_statements(&self, record: &ForecastRecord) -> Vec<String> {
        let destination = format!("{}.{}", self.schema, self.table);
        let staging = format!("{}.{}_STG", self.schema, self.table);
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {destination} (\
                 DATE DATE, \
                 WEATHERCODE INTEGER, \
                 TEMP_MAX_F FLOAT, \
                 TEMP_MIN_F FLOAT, \
                 PRECIPITATION_SUM FLOAT, \
                 LOAD_TS_UTC TIMESTAMP_TZ)"
            ),
            format!("CREATE OR REPLACE TEMPORARY TABLE {staging} LIKE {destination}"),
            format!(
                "INSERT INTO {staging} VALUES ('{}'::DATE, {}, {}, {}, {}, '{}'::TIMESTAMP_TZ)",
                record.date,
                record.weathercode,
                record.temp_max_f,
                record.temp_min_f,
                record.precipitation_sum,
                record.load_ts_utc,
            ),
            format!(
                "MERGE INTO {destination} t USING {staging} s ON t.DATE = s.DATE \
                 WHEN MATCHED THEN UPDATE SET \
                 WEATHERCODE = s.WEATHERCODE, \
                 TEMP_MAX_F = s.TEMP_MAX_F, \
                 TEMP_MIN_F = s.TEMP_MIN_F, \
                 PRECIPITATION_SUM = s.PRECIPITATION_SUM, \
                 LOAD_TS_UTC = s.LOAD_TS_UTC \
                 WHEN NOT MATCHED THEN INSERT \
                 (DATE, WEATHERCODE, TEMP_MAX_F, TEMP_MIN_F, PRECIPITATION_SUM, LOAD_TS_UTC) \
                 VALUES (s.DATE, s.WEATHERCODE, s.TEMP_MAX_F, s.TEMP_MIN_F, s.PRECIPITATION_SUM, s.LOAD_TS_UTC)"
            ),
            format!("DROP TABLE IF EXISTS {staging}"),
        ]
    }
}

pub fn parse_daily(json: &str) -> Result<Vec<DailyRow>, JobError> {
    let response: ForecastResponse =
        serde_json::from_str(json).map_err(|e| JobError::DataShape(e.to_string()))?;
    let Some(daily) = response.daily else {
        return Err(JobError::DataShape("response has no `daily` series".to_string()));
    };
    let n = daily.time.len();
    if daily.weathercode.len() != n
        || daily.temperature_2m_max.len() != n
        || daily.temperature_2m_min.len() != n
        || daily.precipitation_sum.len() != n
    {
        return Err(JobError::DataShape("`daily` arrays have mismatched lengths".to_string()));
    }
    Ok((0..n)
        .map(|i| DailyRow {
            date: daily.time[i],
            weathercode: daily.weathercode[i],
            temperature_2m_max: daily.temperature_2m_max[i],
            temperature_2m_min: daily.temperature_2m_min[i],
            precipitation_sum: daily.precipitation_sum[i],
        })
        .collect())
}

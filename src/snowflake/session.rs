use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::errors::JobError;
use crate::snowflake::auth;
use crate::snowflake::credentials::Credentials;

/// Server-side statement timeout.  The HTTP client itself has no timeout;
/// database round trips rely on network defaults.
const STATEMENT_TIMEOUT_SECS: u32 = 60;

/// Deployment identifiers for the warehouse session.  Static per deployment.
pub struct ConnectionConfig {
    pub database: String,
    pub schema: String,
    pub warehouse: String,
    pub connection_name: String,
}

/// Failure of a single SQL API request.  The caller decides whether it
/// counts as a connection or a persistence problem.
#[derive(Error, Debug)]
pub enum StatementError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("statement failed [{code}]: {message}")]
    Api { code: String, message: String },

    #[error("statement did not complete within {STATEMENT_TIMEOUT_SECS}s")]
    Pending,
}

/// A session against Snowflake's SQL REST API v2, authenticated with a
/// key-pair JWT.  Each request carries the full execution context, so the
/// session holds no server-side state beyond a single request.
pub struct SqlSession {
    client: Client,
    statements_url: String,
    jwt: String,
    database: String,
    schema: String,
    warehouse: String,
}

impl SqlSession {
    /// Sign the JWT and verify the session with a `SELECT 1` round trip.
    /// One attempt per run; a failed run waits for the next schedule tick.
    pub fn connect(config: &ConnectionConfig, creds: &Credentials) -> Result<SqlSession, JobError> {
        let jwt = auth::keypair_jwt(&creds.account, &creds.user, &creds.private_key)?;
        let client = Client::builder()
            .build()
            .map_err(|e| JobError::Connection(format!("failed to build HTTP client: {}", e)))?;
        let session = SqlSession {
            client,
            statements_url: format!(
                "https://{}.snowflakecomputing.com/api/v2/statements",
                creds.account.to_lowercase()
            ),
            jwt,
            database: config.database.clone(),
            schema: config.schema.clone(),
            warehouse: config.warehouse.clone(),
        };
        session
            .execute("SELECT 1")
            .map_err(|e| JobError::Connection(e.to_string()))?;
        Ok(session)
    }

    pub fn execute(&self, sql: &str) -> Result<(), StatementError> {
        self.post(json!({
            "statement": sql,
            "timeout": STATEMENT_TIMEOUT_SECS,
            "database": self.database,
            "schema": self.schema,
            "warehouse": self.warehouse,
        }))
    }

    /// Run several statements in one request, i.e. one SQL API session, so
    /// temporary tables are visible across them and are gone afterwards.
    /// Snowflake aborts the remainder of the batch on the first failure.
    pub fn execute_batch(&self, statements: &[String]) -> Result<(), StatementError> {
        self.post(json!({
            "statement": statements.join(";\n"),
            "timeout": STATEMENT_TIMEOUT_SECS,
            "database": self.database,
            "schema": self.schema,
            "warehouse": self.warehouse,
            "parameters": { "MULTI_STATEMENT_COUNT": statements.len().to_string() },
        }))
    }

    fn post(&self, body: serde_json::Value) -> Result<(), StatementError> {
        let response = self
            .client
            .post(&self.statements_url)
            .header(AUTHORIZATION, format!("Bearer {}", self.jwt))
            .header("X-Snowflake-Authorization-Token-Type", "KEYPAIR_JWT")
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, concat!("wxload/", env!("CARGO_PKG_VERSION")))
            .json(&body)
            .send()?;

        let status = response.status();
        // 202 means the statement is still executing server-side; this job
        // does not poll, it reruns tomorrow.
        if status == StatusCode::ACCEPTED {
            return Err(StatementError::Pending);
        }
        if status.is_success() {
            return Ok(());
        }
        let failure: ApiFailure = response.json().unwrap_or_default();
        Err(StatementError::Api {
            code: failure.code.unwrap_or_else(|| status.as_u16().to_string()),
            message: failure.message.unwrap_or_else(|| format!("HTTP {}", status)),
        })
    }
}

#[derive(Deserialize, Default)]
struct ApiFailure {
    code: Option<String>,
    message: Option<String>,
}

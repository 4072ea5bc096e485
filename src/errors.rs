use thiserror::Error;

/// Failure taxonomy for one run of the landing job.  Nothing here is caught
/// and retried in-process; every variant surfaces to the scheduler, and
/// recovery is the next daily trigger (or a manual rerun).
#[derive(Error, Debug)]
pub enum JobError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("unexpected payload shape: {0}")]
    DataShape(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

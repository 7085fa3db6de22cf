use std::time::Duration;

use thiserror::Error;

/// Error raised by a backend client while fetching one query.
#[derive(Debug, Error)]
pub enum BackendError {
    #[cfg(any(feature = "prometheus", feature = "influx"))]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend responded with status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Backend reported an error: {0}")]
    Api(String),

    #[error("Unexpected response shape: {0}")]
    UnexpectedShape(String),

    #[error("Couldn't decode response body.\n{0}")]
    Decode(#[from] serde_json::Error),

    #[error("Fetch panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

/// Series inside one outcome don't line up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("Series '{name}' has {timestamps} timestamps but {values} values")]
    Ragged {
        name: String,
        timestamps: usize,
        values: usize,
    },

    #[error("Series '{name}' has {found} points, expected {expected}")]
    Mismatch {
        name: String,
        expected: usize,
        found: usize,
    },
}

/// The renderer couldn't turn valid data into a chart.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no points")]
    NoPoints,

    #[error("Drawing failed: {0}")]
    Draw(String),
}

/// Why a single task did not produce a chart.
///
/// Every kind is captured per task, a failure never affects sibling tasks.
#[derive(Debug, Error)]
pub enum Failure {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Shape(#[from] ShapeError),
}

impl Failure {
    /// Short text used for the placeholder panel of a failed task, always on
    /// a single line.
    pub fn placeholder(&self) -> String {
        match self {
            Failure::Render(RenderError::NoPoints) => "no points".to_string(),
            other => other
                .to_string()
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Failure::Timeout(_))
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("Per-task timeout must be greater than zero")]
    InvalidTimeout,

    #[error("Couldn't build the worker pool.\n{0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Value '{0}' must look like host:port, e.g. localhost:9090")]
    HostPort(String),

    #[error(
        "Please supply values for all of --email-from, --email-to, --email-subject and --smtp-host-port or none of them"
    )]
    PartialEmail,

    #[error("Query '{0}' must look like LABEL=EXPRESSION")]
    Query(String),

    #[error("No queries configured, pass --query or --dashboards")]
    NoTasks,
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("Couldn't read dashboards.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Dashboard on line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
}

#[cfg(feature = "mail")]
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid address '{0}': {1}")]
    Address(String, lettre::address::AddressError),

    #[error("Couldn't build message.\n{0}")]
    Message(#[from] lettre::error::Error),

    #[error("Invalid attachment content type.\n{0}")]
    ContentType(#[from] lettre::message::header::ContentTypeErr),

    #[error("Couldn't read attachment.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("SMTP delivery failed.\n{0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("Panel '{label}': {failure}")]
    Panel { label: String, failure: Failure },

    #[error("Error while saving the report.\n{0}")]
    Encode(#[from] EncodeError),

    #[cfg(feature = "mail")]
    #[error("Error while mailing the report.\n{0}")]
    Mail(#[from] MailError),
}

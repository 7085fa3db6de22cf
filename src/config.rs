use std::time::Duration;

use camino::Utf8PathBuf;

use crate::canvas::Layout;
use crate::error::ConfigError;
use crate::report::FailurePolicy;
use crate::task::QueryTask;

/// Everything a single report run needs besides its tasks and collaborators.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    /// Upper bound on queries in flight.
    pub concurrency: usize,
    /// Per query, measured from the moment it starts.
    pub timeout: Duration,
    pub width: u32,
    pub height: u32,
    pub chart_width: u32,
    pub chart_height: u32,
    pub layout: Layout,
    pub policy: FailurePolicy,
    /// Written as the first header line when set.
    pub title: Option<String>,
    pub png_path: Utf8PathBuf,
    pub email: Option<EmailConfig>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            timeout: Duration::from_secs(1),
            width: 600,
            height: 600,
            chart_width: 300,
            chart_height: 200,
            layout: Layout::default(),
            policy: FailurePolicy::default(),
            title: None,
            png_path: Utf8PathBuf::from("out.png"),
            email: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailConfig {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub smtp_host_port: String,
    pub body: String,
}

impl EmailConfig {
    /// Email is all or nothing: either every part is given, or none is.
    ///
    /// `to` may list several recipients separated by commas.
    pub fn from_parts(
        from: Option<String>,
        to: Option<String>,
        subject: Option<String>,
        smtp_host_port: Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        let parts = [&from, &to, &subject, &smtp_host_port];
        let given = parts
            .iter()
            .filter(|part| part.as_deref().is_some_and(|s| !s.trim().is_empty()))
            .count();

        match (given, from, to, subject, smtp_host_port) {
            (0, ..) => Ok(None),
            (4, Some(from), Some(to), Some(subject), Some(smtp_host_port)) => {
                validate_host_port(&smtp_host_port)?;
                let to = to
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();

                Ok(Some(Self {
                    from,
                    to,
                    subject,
                    smtp_host_port,
                    body: "(see attached image)".to_string(),
                }))
            }
            _ => Err(ConfigError::PartialEmail),
        }
    }
}

/// Accepts `host:port` with a lowercase host name and a numeric port.
pub fn validate_host_port(value: &str) -> Result<(&str, u16), ConfigError> {
    let invalid = || ConfigError::HostPort(value.to_string());

    let (host, port) = value.rsplit_once(':').ok_or_else(invalid)?;
    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    if !host_ok {
        return Err(invalid());
    }

    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host, port))
}

/// Parses a `LABEL=EXPRESSION` command line query. Only the first `=` splits,
/// expressions are free to contain more.
pub fn parse_query(value: &str) -> Result<QueryTask, ConfigError> {
    let (label, expression) = value
        .split_once('=')
        .map(|(l, e)| (l.trim(), e.trim()))
        .filter(|(l, e)| !l.is_empty() && !e.is_empty())
        .ok_or_else(|| ConfigError::Query(value.to_string()))?;

    Ok(QueryTask::new(expression, label))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn test_defaults() {
        let config = ReportConfig::default();

        assert_eq!(config.concurrency, 3);
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert_eq!((config.width, config.height), (600, 600));
        assert_eq!((config.chart_width, config.chart_height), (300, 200));
        assert_eq!(config.policy, FailurePolicy::Degrade);
        assert_eq!(config.png_path, "out.png");
        assert!(config.email.is_none());
    }

    #[test]
    fn test_email_none() {
        assert_eq!(EmailConfig::from_parts(None, None, None, None).unwrap(), None);
    }

    #[test]
    fn test_email_all() {
        let email = EmailConfig::from_parts(
            some("Reports <reports@example.com>"),
            some("a@example.com, b@example.com"),
            some("Daily report"),
            some("localhost:25"),
        )
        .unwrap()
        .unwrap();

        assert_eq!(email.to, vec!["a@example.com", "b@example.com"]);
        assert_eq!(email.smtp_host_port, "localhost:25");
        assert_eq!(email.body, "(see attached image)");
    }

    #[test]
    fn test_email_partial() {
        let err = EmailConfig::from_parts(some("me@example.com"), None, some("hi"), None);
        assert!(matches!(err, Err(ConfigError::PartialEmail)));

        let blank = EmailConfig::from_parts(
            some("me@example.com"),
            some(" "),
            some("hi"),
            some("localhost:25"),
        );
        assert!(matches!(blank, Err(ConfigError::PartialEmail)));
    }

    #[test]
    fn test_email_bad_smtp_host() {
        let err = EmailConfig::from_parts(
            some("me@example.com"),
            some("you@example.com"),
            some("hi"),
            some("localhost"),
        );
        assert!(matches!(err, Err(ConfigError::HostPort(_))));
    }

    #[test]
    fn test_validate_host_port() {
        assert_eq!(validate_host_port("localhost:9090").unwrap(), ("localhost", 9090));
        assert_eq!(
            validate_host_port("metrics-1.internal:8086").unwrap(),
            ("metrics-1.internal", 8086)
        );

        for bad in ["localhost", ":9090", "Localhost:9090", "host:port", "host:70000", "a b:1"] {
            assert!(validate_host_port(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_parse_query() {
        let task = parse_query("Visits=sum(rate(visits[5m])) by (status=\"200\")").unwrap();
        assert_eq!(task.label, "Visits");
        assert_eq!(task.expression, "sum(rate(visits[5m])) by (status=\"200\")");

        assert!(parse_query("no separator").is_err());
        assert!(parse_query("=up").is_err());
        assert!(parse_query("Up=").is_err());
    }
}

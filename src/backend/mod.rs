//! Backend clients for the metrics stores a report can query.
//!
//! Both clients speak plain HTTP and pass the executor's per-task timeout to
//! the request, so a query abandoned by the executor is also cut off on the
//! wire instead of lingering in the background.

#[cfg(feature = "influx")]
mod influx;
#[cfg(feature = "prometheus")]
mod prometheus;

#[cfg(feature = "influx")]
pub use influx::InfluxBackend;
#[cfg(feature = "prometheus")]
pub use prometheus::PrometheusBackend;

#[cfg(any(feature = "prometheus", feature = "influx"))]
pub(crate) use http::{base_url, get};

#[cfg(any(feature = "prometheus", feature = "influx"))]
mod http {
    use std::time::Duration;

    use reqwest::Url;
    use reqwest::blocking::Client;

    use crate::error::BackendError;

    pub(crate) fn base_url(host_port: &str) -> String {
        if host_port.starts_with("http://") || host_port.starts_with("https://") {
            host_port.trim_end_matches('/').to_string()
        } else {
            format!("http://{host_port}")
        }
    }

    /// Issues a GET and returns the status code with the raw body, leaving
    /// interpretation of error bodies to the caller.
    pub(crate) fn get(
        client: &Client,
        endpoint: &str,
        params: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<(u16, Vec<u8>), BackendError> {
        let url = Url::parse_with_params(endpoint, params)
            .map_err(|e| BackendError::Other(format!("invalid URL '{endpoint}': {e}")))?;

        tracing::debug!(%url, "GET");

        let response = client.get(url).timeout(timeout).send()?;
        let status = response.status().as_u16();
        let body = response.bytes()?.to_vec();

        Ok((status, body))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_base_url() {
            assert_eq!(base_url("localhost:9090"), "http://localhost:9090");
            assert_eq!(base_url("https://prom.example/"), "https://prom.example");
        }
    }
}

/// Trims an error body down to something that fits on a log line.
#[cfg(any(feature = "prometheus", feature = "influx"))]
pub(crate) fn excerpt(body: &[u8]) -> String {
    const MAX: usize = 200;
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    match text.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(all(test, any(feature = "prometheus", feature = "influx")))]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt(b"  oops \n"), "oops");
        let long = "x".repeat(300);
        assert_eq!(excerpt(long.as_bytes()).chars().count(), 201);
    }
}

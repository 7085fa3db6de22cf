use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::error::BackendError;
use crate::executor::Backend;
use crate::series::{Series, SeriesData};
use crate::task::QueryTask;

/// Queries the Prometheus HTTP API with `query_range` over a trailing window.
#[derive(Debug, Clone)]
pub struct PrometheusBackend {
    base: String,
    client: Client,
    window: Duration,
    step: Duration,
}

impl PrometheusBackend {
    /// Backend for a server at `host_port`, asking for the last 24 hours in
    /// 20 minute steps.
    pub fn new(host_port: &str) -> Result<Self, BackendError> {
        Ok(Self {
            base: super::base_url(host_port),
            client: Client::builder().build()?,
            window: Duration::from_secs(24 * 60 * 60),
            step: Duration::from_secs(20 * 60),
        })
    }

    pub fn with_window(mut self, window: Duration, step: Duration) -> Self {
        self.window = window;
        self.step = step;
        self
    }
}

impl Backend for PrometheusBackend {
    fn fetch(&self, task: &QueryTask, timeout: Duration) -> Result<SeriesData, BackendError> {
        let end = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| BackendError::Other(e.to_string()))?
            .as_secs_f64();
        let start = end - self.window.as_secs_f64();

        let endpoint = format!("{}/api/v1/query_range", self.base);
        let (start, end, step) = (
            format!("{start:.3}"),
            format!("{end:.3}"),
            format!("{}s", self.step.as_secs().max(1)),
        );

        let (status, body) = super::get(
            &self.client,
            &endpoint,
            &[
                ("query", task.expression.as_str()),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("step", step.as_str()),
            ],
            timeout,
        )?;

        parse_query_range(status, &body)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    status: String,
    #[serde(default)]
    data: Option<Data>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Data {
    result_type: String,
    #[serde(default)]
    result: Vec<Stream>,
}

#[derive(Debug, Deserialize)]
struct Stream {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

/// Decodes a `query_range` response body into one series per stream.
pub(crate) fn parse_query_range(status: u16, body: &[u8]) -> Result<SeriesData, BackendError> {
    let envelope: Envelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(_) if !(200..300).contains(&status) => {
            return Err(BackendError::Status {
                code: status,
                message: super::excerpt(body),
            });
        }
        Err(err) => return Err(BackendError::Decode(err)),
    };

    if envelope.status != "success" {
        let kind = envelope.error_type.unwrap_or_else(|| "error".into());
        let message = envelope.error.unwrap_or_default();
        return Err(BackendError::Api(format!("{kind}: {message}")));
    }

    let data = envelope
        .data
        .ok_or_else(|| BackendError::UnexpectedShape("response has no data".into()))?;

    if data.result_type != "matrix" {
        return Err(BackendError::UnexpectedShape(format!(
            "expected a matrix result, got '{}'",
            data.result_type
        )));
    }

    let mut series = Vec::with_capacity(data.result.len());
    for stream in data.result {
        let mut s = Series::new(metric_name(&stream.metric));
        for (timestamp, value) in stream.values {
            let value: f64 = value.parse().map_err(|_| {
                BackendError::UnexpectedShape(format!("sample value '{value}' is not a number"))
            })?;
            s.push((timestamp * 1000.0).round() as i64, value);
        }
        series.push(s);
    }

    Ok(SeriesData::new(series))
}

/// Formats a label set the way Prometheus prints it: `name{k="v",...}`.
fn metric_name(metric: &BTreeMap<String, String>) -> String {
    let name = metric.get("__name__").map(String::as_str).unwrap_or("");
    let labels: Vec<String> = metric
        .iter()
        .filter(|(k, _)| k.as_str() != "__name__")
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .collect();

    match (name.is_empty(), labels.is_empty()) {
        (true, true) => "series".to_string(),
        (_, true) => name.to_string(),
        _ => format!("{name}{{{}}}", labels.join(",")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MATRIX: &str = r#"{
        "status": "success",
        "data": {
            "resultType": "matrix",
            "result": [
                {
                    "metric": {"__name__": "cloudfront_visits", "site_name": "vocabincontext.com", "status": "200"},
                    "values": [[1435781430.781, "1"], [1435781445.781, "NaN"], [1435781460.781, "3.5"]]
                },
                {
                    "metric": {},
                    "values": [[1435781430.781, "0"], [1435781445.781, "0"], [1435781460.781, "1"]]
                }
            ]
        }
    }"#;

    #[test]
    fn test_parse_matrix() {
        let data = parse_query_range(200, MATRIX.as_bytes()).unwrap();

        assert_eq!(data.series.len(), 2);
        let first = &data.series[0];
        assert_eq!(
            first.name,
            r#"cloudfront_visits{site_name="vocabincontext.com",status="200"}"#
        );
        assert_eq!(first.timestamps, vec![1435781430781, 1435781445781, 1435781460781]);
        assert_eq!(first.values[0], 1.0);
        assert!(first.values[1].is_nan());
        assert_eq!(first.values[2], 3.5);
        assert_eq!(data.series[1].name, "series");
        assert!(data.validate().is_ok());
    }

    #[test]
    fn test_parse_api_error() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"parse error at char 4"}"#;
        let err = parse_query_range(400, body.as_bytes()).unwrap_err();

        match err {
            BackendError::Api(msg) => assert_eq!(msg, "bad_data: parse error at char 4"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_non_json_error() {
        let err = parse_query_range(502, b"Bad Gateway").unwrap_err();
        assert!(matches!(err, BackendError::Status { code: 502, .. }));
    }

    #[test]
    fn test_parse_vector_is_rejected() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#;
        let err = parse_query_range(200, body.as_bytes()).unwrap_err();
        assert!(matches!(err, BackendError::UnexpectedShape(_)));
    }

    #[test]
    fn test_metric_name() {
        let mut metric = BTreeMap::new();
        assert_eq!(metric_name(&metric), "series");
        metric.insert("__name__".to_string(), "up".to_string());
        assert_eq!(metric_name(&metric), "up");
        metric.insert("job".to_string(), "node".to_string());
        assert_eq!(metric_name(&metric), r#"up{job="node"}"#);
    }
}

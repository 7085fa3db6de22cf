use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::error::BackendError;
use crate::executor::Backend;
use crate::series::{Series, SeriesData};
use crate::task::QueryTask;

/// Runs InfluxQL through the InfluxDB 1.x `/query` endpoint.
#[derive(Debug, Clone)]
pub struct InfluxBackend {
    base: String,
    database: String,
    client: Client,
}

impl InfluxBackend {
    pub fn new(host_port: &str, database: impl Into<String>) -> Result<Self, BackendError> {
        Ok(Self {
            base: super::base_url(host_port),
            database: database.into(),
            client: Client::builder().build()?,
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

impl Backend for InfluxBackend {
    fn fetch(&self, task: &QueryTask, timeout: Duration) -> Result<SeriesData, BackendError> {
        let endpoint = format!("{}/query", self.base);
        let (status, body) = super::get(
            &self.client,
            &endpoint,
            &[
                ("db", self.database.as_str()),
                ("q", task.expression.as_str()),
                ("epoch", "ns"),
            ],
            timeout,
        )?;

        parse_response(status, &body)
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Rows>,
    #[serde(default)]
    messages: Vec<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Rows {
    #[serde(default)]
    name: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Decodes a single-statement response.
///
/// Every returned series must be `(time, value)` shaped. A grouped query
/// yields one series per tag set, all aligned to the sorted union of their
/// timestamps; a series with no row at some time holds `NaN` there. Null
/// values are dropped and nanosecond times become millis.
pub(crate) fn parse_response(status: u16, body: &[u8]) -> Result<SeriesData, BackendError> {
    let response: Response = match serde_json::from_slice(body) {
        Ok(response) => response,
        Err(_) if !(200..300).contains(&status) => {
            return Err(BackendError::Status {
                code: status,
                message: super::excerpt(body),
            });
        }
        Err(err) => return Err(BackendError::Decode(err)),
    };

    if let Some(error) = response.error {
        return Err(BackendError::Api(error));
    }

    let [result] = <[StatementResult; 1]>::try_from(response.results).map_err(|results| {
        BackendError::UnexpectedShape(format!("expected 1 result, got {}", results.len()))
    })?;

    if let Some(error) = result.error {
        return Err(BackendError::Api(error));
    }
    if !result.messages.is_empty() {
        return Err(BackendError::Api(format!(
            "unexpected messages: {}",
            Value::Array(result.messages)
        )));
    }

    let mut columns = Vec::with_capacity(result.series.len());
    for rows in result.series {
        columns.push((series_name(&rows), points(rows)?));
    }

    let axis: BTreeSet<i64> = columns
        .iter()
        .flat_map(|(_, points)| points.keys().copied())
        .collect();
    if axis.is_empty() {
        return Ok(SeriesData::default());
    }

    let series = columns
        .into_iter()
        .filter(|(_, points)| !points.is_empty())
        .map(|(name, points)| {
            let mut series = Series::new(name);
            for &t in &axis {
                series.push(t, points.get(&t).copied().unwrap_or(f64::NAN));
            }
            series
        })
        .collect();

    Ok(SeriesData::new(series))
}

/// Non-null rows of one series keyed by millisecond time.
fn points(rows: Rows) -> Result<BTreeMap<i64, f64>, BackendError> {
    if rows.columns.len() != 2 {
        return Err(BackendError::UnexpectedShape(format!(
            "expected 2 columns, got {}",
            rows.columns.len()
        )));
    }
    if rows.columns[0] != "time" {
        return Err(BackendError::UnexpectedShape(format!(
            "expected first column to be 'time', got '{}'",
            rows.columns[0]
        )));
    }

    let mut points = BTreeMap::new();
    for row in rows.values {
        let [time, value] = row.as_slice() else {
            return Err(BackendError::UnexpectedShape(format!(
                "expected 2 cells per row, got {}",
                row.len()
            )));
        };

        if value.is_null() {
            continue;
        }

        let nanos = time.as_i64().ok_or_else(|| {
            BackendError::UnexpectedShape(format!("time {time} is not an integer"))
        })?;
        let value = value.as_f64().ok_or_else(|| {
            BackendError::UnexpectedShape(format!("value {value} is not a number"))
        })?;

        points.insert(nanos.div_euclid(1_000_000), value);
    }

    Ok(points)
}

/// `measurement{tag="value",...}`, or just the measurement when ungrouped.
fn series_name(rows: &Rows) -> String {
    let name = match rows.name.is_empty() {
        true => "series",
        false => rows.name.as_str(),
    };
    if rows.tags.is_empty() {
        return name.to_string();
    }

    let tags: Vec<String> = rows
        .tags
        .iter()
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .collect();
    format!("{name}{{{}}}", tags.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_one_series_per_tag_set() {
        let body = r#"{"results":[{"statement_id":0,"series":[
            {"name":"cpu","tags":{"host":"a"},"columns":["time","mean"],
             "values":[[1000000000,1.0],[2000000000,2.0],[3000000000,3.0]]},
            {"name":"cpu","tags":{"host":"b"},"columns":["time","mean"],
             "values":[[1000000000,4.0],[2000000000,5.0],[3000000000,6.0]]}
        ]}]}"#;
        let data = parse_response(200, body.as_bytes()).unwrap();

        assert_eq!(data.series.len(), 2);
        assert_eq!(data.series[0].name, "cpu{host=\"a\"}");
        assert_eq!(data.series[0].timestamps, vec![1000, 2000, 3000]);
        assert_eq!(data.series[0].values, vec![1.0, 2.0, 3.0]);
        assert_eq!(data.series[1].name, "cpu{host=\"b\"}");
        assert_eq!(data.series[1].timestamps, vec![1000, 2000, 3000]);
        assert_eq!(data.series[1].values, vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_parse_aligns_sparse_series() {
        let body = r#"{"results":[{"statement_id":0,"series":[
            {"name":"cpu","tags":{"host":"a"},"columns":["time","mean"],
             "values":[[3000000000,0.5],[1000000000,0.25],[2000000000,null]]},
            {"name":"cpu","tags":{"host":"b"},"columns":["time","mean"],
             "values":[[2000000000,0.75]]}
        ]}]}"#;
        let data = parse_response(200, body.as_bytes()).unwrap().validate().unwrap();

        assert_eq!(data.series.len(), 2);
        let (a, b) = (&data.series[0], &data.series[1]);
        assert_eq!(a.timestamps, vec![1000, 2000, 3000]);
        assert_eq!(b.timestamps, vec![1000, 2000, 3000]);
        assert_eq!(a.points().collect::<Vec<_>>(), vec![(1000, 0.25), (3000, 0.5)]);
        assert_eq!(b.points().collect::<Vec<_>>(), vec![(2000, 0.75)]);
    }

    #[test]
    fn test_parse_ungrouped_series_keeps_measurement_name() {
        let body = r#"{"results":[{"series":[
            {"name":"visits","columns":["time","count"],"values":[[60000000000,7]]}
        ]}]}"#;
        let data = parse_response(200, body.as_bytes()).unwrap();

        assert_eq!(data.series.len(), 1);
        assert_eq!(data.series[0].name, "visits");
        assert_eq!(data.series[0].timestamps, vec![60000]);
        assert_eq!(data.series[0].values, vec![7.0]);
    }

    #[test]
    fn test_parse_empty_result() {
        let body = r#"{"results":[{"statement_id":0}]}"#;
        let data = parse_response(200, body.as_bytes()).unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn test_parse_statement_error() {
        let body = r#"{"results":[{"statement_id":0,"error":"database not found: metrics"}]}"#;
        let err = parse_response(200, body.as_bytes()).unwrap_err();

        match err {
            BackendError::Api(msg) => assert_eq!(msg, "database not found: metrics"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_top_level_error() {
        let body = r#"{"error":"error parsing query: found EOF"}"#;
        let err = parse_response(400, body.as_bytes()).unwrap_err();
        assert!(matches!(err, BackendError::Api(_)));
    }

    #[test]
    fn test_parse_rejects_wide_rows() {
        let body = r#"{"results":[{"series":[
            {"name":"cpu","columns":["time","a","b"],"values":[[1,2,3]]}
        ]}]}"#;
        let err = parse_response(200, body.as_bytes()).unwrap_err();
        assert!(matches!(err, BackendError::UnexpectedShape(_)));
    }

    #[test]
    fn test_parse_rejects_multiple_statements() {
        let body = r#"{"results":[{},{}]}"#;
        let err = parse_response(200, body.as_bytes()).unwrap_err();
        assert!(matches!(err, BackendError::UnexpectedShape(_)));
    }

    #[test]
    fn test_parse_html_error_page() {
        let err = parse_response(503, b"<html>unavailable</html>").unwrap_err();
        assert!(matches!(err, BackendError::Status { code: 503, .. }));
    }
}

//! Task lists loaded from exported Grafana dashboards.
//!
//! The input holds one dashboard JSON document per line. Every target of
//! every panel turns into one query task, labelled with the panel title.

use std::io::BufRead;

use serde::Deserialize;
use serde_json::Value;

use crate::error::DashboardError;
use crate::task::{QueryTask, YRange};

/// Replacement for Grafana's `$timeFilter` macro.
const TIME_FILTER: &str = "time > now() - 24h";
/// Replacement for Grafana's interval macros.
const INTERVAL: &str = "20m";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Dashboard {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub rows: Vec<Row>,
    /// Newer exports drop rows and list panels directly.
    #[serde(default)]
    pub panels: Vec<Panel>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Row {
    #[serde(default)]
    pub panels: Vec<Panel>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Panel {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub datasource: Option<Value>,
    #[serde(default)]
    pub yaxes: Vec<YAxis>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default)]
    pub hide: bool,
    /// Raw InfluxQL.
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub raw_query: bool,
    /// PromQL, used by Prometheus panels.
    #[serde(default)]
    pub expr: Option<String>,
    #[serde(default)]
    pub measurement: Option<String>,
    #[serde(default)]
    pub select: Vec<Vec<Part>>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub group_by: Vec<Part>,
}

/// One step of a select chain or group-by clause.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Part {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Tag {
    pub key: String,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub condition: Option<String>,
}

/// Grafana writes axis bounds as strings, numbers or null.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct YAxis {
    #[serde(default)]
    pub min: Option<Value>,
    #[serde(default)]
    pub max: Option<Value>,
}

impl YAxis {
    fn range(&self) -> Option<YRange> {
        let min = number(self.min.as_ref()?)?;
        let max = number(self.max.as_ref()?)?;
        Some(YRange::new(min, max))
    }
}

fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    n.filter(|n: &f64| n.is_finite())
}

/// Reads one dashboard per non-blank line.
pub fn parse_dashboards<R: BufRead>(reader: R) -> Result<Vec<Dashboard>, DashboardError> {
    let mut dashboards = vec![];

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let dashboard = serde_json::from_str(&line)
            .map_err(|source| DashboardError::Parse { line: i + 1, source })?;
        dashboards.push(dashboard);
    }

    Ok(dashboards)
}

impl Dashboard {
    /// Every panel, in the order the dashboard lists them.
    pub fn all_panels(&self) -> impl Iterator<Item = &Panel> {
        self.rows
            .iter()
            .flat_map(|row| row.panels.iter())
            .chain(self.panels.iter())
    }

    /// Query tasks in declared order. Hidden targets and targets with
    /// nothing to query are skipped.
    pub fn tasks(&self) -> Vec<QueryTask> {
        let mut tasks = vec![];

        for panel in self.all_panels() {
            let label = match panel.title.trim() {
                "" => self.title.as_str(),
                title => title,
            };
            let y_range = panel.yaxes.iter().find_map(YAxis::range);

            for target in panel.targets.iter().filter(|t| !t.hide) {
                let Some(expression) = target.expression() else {
                    tracing::debug!(panel = label, "target has nothing to query");
                    continue;
                };

                let mut task = QueryTask::new(expression, label);
                if let Some(range) = y_range {
                    task = task.with_y_range(range.min, range.max);
                }
                tasks.push(task);
            }
        }

        tasks
    }
}

impl Target {
    /// The query text to send, with dashboard macros filled in.
    pub fn expression(&self) -> Option<String> {
        if let Some(expr) = non_empty(&self.expr) {
            return Some(expand_macros(expr));
        }

        let raw = non_empty(&self.query);
        let measurement = non_empty(&self.measurement);

        match (raw, measurement) {
            (Some(query), None) => Some(expand_macros(query)),
            (Some(query), Some(_)) if self.raw_query => Some(expand_macros(query)),
            (_, Some(measurement)) => Some(expand_macros(&self.build_influxql(measurement))),
            (None, None) => None,
        }
    }

    /// Assembles InfluxQL the way Grafana's query editor does.
    fn build_influxql(&self, measurement: &str) -> String {
        let fields = match self.select.is_empty() {
            true => "mean(\"value\")".to_string(),
            false => self
                .select
                .iter()
                .map(|chain| select_chain(chain))
                .collect::<Vec<_>>()
                .join(", "),
        };

        let mut query = format!("SELECT {fields} FROM \"{measurement}\" WHERE ");

        // AND binds tighter than OR, so the tags are grouped before the time filter.
        if !self.tags.is_empty() {
            let mut conditions = String::new();
            for (i, tag) in self.tags.iter().enumerate() {
                if i > 0 {
                    let condition = tag.condition.as_deref().unwrap_or("AND");
                    conditions.push_str(&format!(" {condition} "));
                }
                conditions.push_str(&tag_condition(tag));
            }
            query.push_str(&format!("({conditions}) AND "));
        }
        query.push_str("$timeFilter");

        let mut groups = vec![];
        let mut fill = None;
        for part in &self.group_by {
            let arg = part.params.first().map(param).unwrap_or_default();
            match part.kind.as_str() {
                "time" => groups.push(format!("time({})", interval(&arg))),
                "tag" => groups.push(format!("\"{arg}\"")),
                "fill" => fill = Some(format!("fill({arg})")),
                other => tracing::debug!(kind = other, "ignoring group by part"),
            }
        }

        if !groups.is_empty() {
            query.push_str(" GROUP BY ");
            query.push_str(&groups.join(", "));
        }
        if let Some(fill) = fill {
            query.push(' ');
            query.push_str(&fill);
        }

        query
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn interval(param: &str) -> &str {
    match param {
        "" | "auto" => "$__interval",
        other => other,
    }
}

/// `[field(value), mean(), math(* 100), alias(cpu)]` becomes
/// `mean("value") * 100 AS "cpu"`.
fn select_chain(chain: &[Part]) -> String {
    let mut expr = String::new();

    for part in chain {
        let first = part.params.first().map(param).unwrap_or_default();
        expr = match part.kind.as_str() {
            "field" => format!("\"{first}\""),
            "math" => format!("{expr} {first}"),
            "alias" => format!("{expr} AS \"{first}\""),
            function => {
                let mut args = vec![expr];
                args.extend(part.params.iter().map(param));
                format!("{function}({})", args.join(", "))
            }
        };
    }

    expr
}

fn tag_condition(tag: &Tag) -> String {
    let operator = tag.operator.as_deref().unwrap_or("=");
    let value = match operator {
        "=~" | "!~" => tag.value.clone(),
        _ => format!("'{}'", tag.value.replace('\'', "\\'")),
    };
    format!("\"{}\" {operator} {value}", tag.key)
}

/// Fills in the dashboard variables this tool knows how to resolve.
pub fn expand_macros(query: &str) -> String {
    query
        .replace("$timeFilter", TIME_FILTER)
        .replace("$__interval", INTERVAL)
        .replace("$interval", INTERVAL)
}

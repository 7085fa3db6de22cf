/// Fixed y axis bounds for a chart, overriding the bounds found in the data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YRange {
    pub min: f64,
    pub max: f64,
}

impl YRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// The `0..1` range used for ratio metrics.
    pub fn unit() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

/// One unit of work: a query expression, the label of the resulting panel and
/// its rendering hints.
///
/// Tasks are compared by value. Two tasks with identical fields are the same
/// task as far as [`ResultTable::get`](crate::ResultTable::get) is concerned,
/// though the executor still resolves each position independently.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTask {
    pub expression: String,
    pub label: String,
    pub y_range: Option<YRange>,
}

impl QueryTask {
    pub fn new(expression: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            label: label.into(),
            y_range: None,
        }
    }

    pub fn with_y_range(mut self, min: f64, max: f64) -> Self {
        self.y_range = Some(YRange::new(min, max));
        self
    }
}

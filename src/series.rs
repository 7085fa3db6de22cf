use crate::error::ShapeError;

/// One time series: parallel timestamp (unix millis) and value sequences.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Series {
    pub name: String,
    pub timestamps: Vec<i64>,
    pub values: Vec<f64>,
}

impl Series {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, timestamp: i64, value: f64) {
        self.timestamps.push(timestamp);
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Pairs with a finite value, the ones a chart can actually plot.
    pub fn points(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.timestamps
            .iter()
            .copied()
            .zip(self.values.iter().copied())
            .filter(|(_, v)| v.is_finite())
    }
}

impl<I> From<(&str, I)> for Series
where
    I: IntoIterator<Item = (i64, f64)>,
{
    fn from((name, points): (&str, I)) -> Self {
        let mut series = Series::new(name);
        for (t, v) in points {
            series.push(t, v);
        }
        series
    }
}

/// Everything one query returned.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SeriesData {
    pub series: Vec<Series>,
}

impl SeriesData {
    pub fn new(series: Vec<Series>) -> Self {
        Self { series }
    }

    /// Checks that every series is internally consistent and that all series
    /// share one length.
    pub fn validate(self) -> Result<Self, ShapeError> {
        for s in &self.series {
            if s.timestamps.len() != s.values.len() {
                return Err(ShapeError::Ragged {
                    name: s.name.clone(),
                    timestamps: s.timestamps.len(),
                    values: s.values.len(),
                });
            }
        }

        if let Some(first) = self.series.first() {
            let expected = first.len();
            if let Some(odd) = self.series.iter().find(|s| s.len() != expected) {
                return Err(ShapeError::Mismatch {
                    name: odd.name.clone(),
                    expected,
                    found: odd.len(),
                });
            }
        }

        Ok(self)
    }

    /// No series, or no plottable point in any of them.
    pub fn is_empty(&self) -> bool {
        self.series.iter().all(|s| s.points().next().is_none())
    }

    pub fn x_bounds(&self) -> Option<(i64, i64)> {
        bounds(self.series.iter().flat_map(|s| s.points().map(|(t, _)| t)))
    }

    pub fn y_bounds(&self) -> Option<(f64, f64)> {
        self.series
            .iter()
            .flat_map(|s| s.points().map(|(_, v)| v))
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

fn bounds(iter: impl Iterator<Item = i64>) -> Option<(i64, i64)> {
    iter.fold(None, |acc, t| match acc {
        None => Some((t, t)),
        Some((lo, hi)) => Some((lo.min(t), hi.max(t))),
    })
}

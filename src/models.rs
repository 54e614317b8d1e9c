use std::collections::BTreeMap;

use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub fields: BTreeMap<String, f64>,
}

impl DailyRecord {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: &str, value: f64) -> Self {
        self.fields.insert(field.to_string(), value);
        self
    }

    pub fn get(&self, field: &str) -> Option<f64> {
        self.fields.get(field).copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldValue {
    pub raw: Option<f64>,
    pub running_total: Option<f64>,
    pub seven_day_average: Option<f64>,
    pub weekly_total: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphPoint {
    pub date: NaiveDate,
    pub value: f64,
    pub running_total: Option<f64>,
    pub seven_day_average: Option<f64>,
    pub weekly_total: Option<f64>,
    pub fields: Vec<FieldValue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphSeries {
    pub metric: String,
    pub label: String,
    pub week_boundary: Weekday,
    pub field_labels: Vec<String>,
    pub counted: Vec<bool>,
    pub points: Vec<GraphPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Lower,
    Higher,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elapsed {
    Days(i64),
    Weeks(i64),
}

impl Elapsed {
    pub fn count(&self) -> i64 {
        match self {
            Elapsed::Days(n) | Elapsed::Weeks(n) => *n,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Superlative {
    pub direction: Direction,
    pub date: NaiveDate,
    pub value: f64,
    pub elapsed: Elapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ViewKind {
    NewValue,
    SevenDayAverage,
    ByWeekday,
    WeeklyTotal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Narrative {
    pub status: String,
    pub url: Option<String>,
    pub callouts: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostedStatus {
    pub step: String,
    pub text: String,
    pub post_id: String,
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MetricSummary {
    pub label: String,
    pub latest_date: NaiveDate,
    pub latest_value: f64,
    pub seven_day_average: Option<f64>,
    pub week_over_week: Option<String>,
    pub running_total: Option<f64>,
    pub callouts: Vec<String>,
}

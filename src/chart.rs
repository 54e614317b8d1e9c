use std::collections::BTreeMap;

use chrono::Datelike;
use serde::Serialize;

use crate::models::{GraphPoint, GraphSeries, ViewKind};
use crate::narrative::weekday_name;

const LABEL_FORMAT: &str = "%d/%m";
const VALUE_AXIS: &str = "y";
const TOTAL_AXIS: &str = "total";

const BAR_COLOR: &str = "rgba(54, 162, 235, 0.6)";
const LINE_COLOR: &str = "rgb(255, 99, 132)";
const TOTAL_COLOR: &str = "rgb(120, 120, 120)";

#[derive(Debug, Clone, Copy)]
pub struct ChartWindow {
    pub days: usize,
    pub weeks: usize,
}

impl Default for ChartWindow {
    fn default() -> Self {
        Self { days: 90, weeks: 26 }
    }
}

/// Declarative chart description in the shape Chart.js expects.
#[derive(Debug, Clone, Serialize)]
pub struct ChartConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: ChartData,
    pub options: ChartOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dataset {
    #[serde(rename = "type")]
    pub kind: String,
    pub label: String,
    pub data: Vec<Option<f64>>,
    #[serde(rename = "yAxisID")]
    pub y_axis_id: String,
    #[serde(rename = "borderColor")]
    pub border_color: String,
    #[serde(rename = "backgroundColor")]
    pub background_color: String,
    pub fill: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartOptions {
    pub plugins: Plugins,
    pub scales: BTreeMap<String, Axis>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Plugins {
    pub title: Title,
}

#[derive(Debug, Clone, Serialize)]
pub struct Title {
    pub display: bool,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Axis {
    pub position: String,
    #[serde(rename = "beginAtZero")]
    pub begin_at_zero: bool,
    pub title: Title,
}

fn dataset(kind: &str, label: &str, data: Vec<Option<f64>>, axis: &str, color: &str) -> Dataset {
    Dataset {
        kind: kind.to_string(),
        label: label.to_string(),
        data,
        y_axis_id: axis.to_string(),
        border_color: color.to_string(),
        background_color: color.to_string(),
        fill: false,
    }
}

fn axis(position: &str, text: &str) -> Axis {
    Axis {
        position: position.to_string(),
        begin_at_zero: true,
        title: Title {
            display: true,
            text: text.to_string(),
        },
    }
}

fn tail<T>(items: &[T], count: usize) -> &[T] {
    &items[items.len().saturating_sub(count)..]
}

fn labels(points: &[&GraphPoint]) -> Vec<String> {
    points
        .iter()
        .map(|p| p.date.format(LABEL_FORMAT).to_string())
        .collect()
}

pub fn build_chart(series: &GraphSeries, view: ViewKind, window: ChartWindow) -> ChartConfig {
    let label = &series.label;
    let mut datasets = Vec::new();

    let (title, points): (String, Vec<&GraphPoint>) = match view {
        ViewKind::NewValue => {
            let points: Vec<&GraphPoint> = tail(&series.points, window.days).iter().collect();
            datasets.push(dataset(
                "bar",
                label,
                points.iter().map(|p| Some(p.value)).collect(),
                VALUE_AXIS,
                BAR_COLOR,
            ));
            (format!("Daily {label}"), points)
        }
        ViewKind::SevenDayAverage => {
            let averaged: Vec<&GraphPoint> = series
                .points
                .iter()
                .filter(|p| p.seven_day_average.is_some())
                .collect();
            let points = tail(&averaged, window.days).to_vec();
            datasets.push(dataset(
                "line",
                "7-day average",
                points.iter().map(|p| p.seven_day_average).collect(),
                VALUE_AXIS,
                LINE_COLOR,
            ));
            datasets.push(dataset(
                "bar",
                label,
                points.iter().map(|p| Some(p.value)).collect(),
                VALUE_AXIS,
                BAR_COLOR,
            ));
            (format!("7-day average of {label}"), points)
        }
        ViewKind::ByWeekday => {
            let weekday = series.latest().map(|p| p.date.weekday());
            let same_day: Vec<&GraphPoint> = series
                .points
                .iter()
                .filter(|p| Some(p.date.weekday()) == weekday)
                .collect();
            let points = tail(&same_day, window.weeks).to_vec();
            datasets.push(dataset(
                "bar",
                label,
                points.iter().map(|p| Some(p.value)).collect(),
                VALUE_AXIS,
                BAR_COLOR,
            ));
            let day = weekday.map(weekday_name).unwrap_or_default();
            (format!("{label} on {day}s"), points)
        }
        ViewKind::WeeklyTotal => {
            let weekly: Vec<&GraphPoint> = series
                .points
                .iter()
                .filter(|p| p.weekly_total.is_some())
                .collect();
            let points = tail(&weekly, window.weeks).to_vec();
            datasets.push(dataset(
                "bar",
                &format!("Weekly {label}"),
                points.iter().map(|p| p.weekly_total).collect(),
                VALUE_AXIS,
                BAR_COLOR,
            ));
            (format!("Weekly {label}"), points)
        }
    };

    let mut scales = BTreeMap::new();
    scales.insert(VALUE_AXIS.to_string(), axis("left", "Daily value"));

    if points.iter().any(|p| p.running_total.is_some()) {
        datasets.push(dataset(
            "line",
            "Total",
            points.iter().map(|p| p.running_total).collect(),
            TOTAL_AXIS,
            TOTAL_COLOR,
        ));
        scales.insert(TOTAL_AXIS.to_string(), axis("right", "Running total"));
    }

    ChartConfig {
        kind: "bar".to_string(),
        data: ChartData {
            labels: labels(&points),
            datasets,
        },
        options: ChartOptions {
            plugins: Plugins {
                title: Title {
                    display: true,
                    text: title,
                },
            },
            scales,
        },
    }
}

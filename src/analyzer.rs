use chrono::{Datelike, NaiveDate, Weekday};

use crate::error::AnalysisError;
use crate::metrics::{FieldKind, FieldPolicy, MetricDefinition, Thresholds};
use crate::models::{
    DailyRecord, Direction, Elapsed, FieldValue, GraphPoint, GraphSeries, Superlative, ViewKind,
};

const WINDOW: usize = 7;
/// Averages start after the 8th record, one later than a full window allows.
const AVERAGE_FROM: usize = 7;

pub fn analyze(
    records: &[DailyRecord],
    definition: &MetricDefinition,
    week_boundary: Weekday,
) -> Result<GraphSeries, AnalysisError> {
    if let Some(pair) = records.windows(2).find(|pair| pair[0].date >= pair[1].date) {
        return Err(AnalysisError::Unsorted(pair[1].date));
    }

    let start = records
        .iter()
        .position(|record| {
            definition
                .field_names()
                .any(|name| record.fields.contains_key(name))
        })
        .ok_or_else(|| AnalysisError::NoData {
            metric: definition.name.clone(),
        })?;
    let records = &records[start..];

    if records.len() < 2 {
        return Err(AnalysisError::InsufficientHistory {
            metric: definition.name.clone(),
            needed: 2,
            found: records.len(),
        });
    }

    let field_count = definition.fields.len();
    let mut last_stored: Vec<Option<f64>> = vec![None; field_count];
    let mut totals: Vec<Option<f64>> = vec![None; field_count];
    let mut first_seen: Vec<Option<usize>> = vec![None; field_count];
    let mut points = Vec::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        let mut fields = Vec::with_capacity(field_count);
        let mut value = 0.0;

        for (slot, field) in definition.fields.iter().enumerate() {
            let raw = match (record.get(&field.name), field.policy) {
                (Some(stored), _) => {
                    let previous = last_stored[slot].replace(stored);
                    Some(match field.kind {
                        FieldKind::Daily | FieldKind::Level => stored,
                        FieldKind::Cumulative => stored - previous.unwrap_or(0.0),
                    })
                }
                (None, FieldPolicy::ZeroDefault) => None,
                (None, FieldPolicy::Required) => {
                    return Err(AnalysisError::MissingField {
                        metric: definition.name.clone(),
                        field: field.name.clone(),
                        date: record.date,
                    })
                }
            };

            if raw.is_some() && first_seen[slot].is_none() {
                first_seen[slot] = Some(index);
            }
            if field.kind != FieldKind::Level {
                if let Some(raw) = raw {
                    totals[slot] = Some(totals[slot].unwrap_or(0.0) + raw);
                }
            }
            if field.counted {
                value += raw.unwrap_or(0.0);
            }

            fields.push(FieldValue {
                raw,
                running_total: totals[slot],
                ..FieldValue::default()
            });
        }

        let running_total = definition
            .fields
            .iter()
            .zip(&totals)
            .filter(|(field, _)| field.counted)
            .filter_map(|(_, total)| *total)
            .fold(None, |acc: Option<f64>, total| Some(acc.unwrap_or(0.0) + total));

        points.push(GraphPoint {
            date: record.date,
            value,
            running_total,
            seven_day_average: None,
            weekly_total: None,
            fields,
        });
    }

    apply_windows(&mut points, &first_seen, week_boundary);

    Ok(GraphSeries {
        metric: definition.name.clone(),
        label: definition.label.clone(),
        week_boundary,
        field_labels: definition.fields.iter().map(|f| f.label.clone()).collect(),
        counted: definition.fields.iter().map(|f| f.counted).collect(),
        points,
    })
}

fn apply_windows(points: &mut [GraphPoint], first_seen: &[Option<usize>], week_boundary: Weekday) {
    for index in AVERAGE_FROM..points.len() {
        let window = &points[index + 1 - WINDOW..=index];
        let sum: f64 = window.iter().map(|point| point.value).sum();
        let field_sums: Vec<Option<f64>> = first_seen
            .iter()
            .enumerate()
            .map(|(slot, seen)| match seen {
                Some(seen) if *seen <= index => Some(
                    window
                        .iter()
                        .map(|point| point.fields[slot].raw.unwrap_or(0.0))
                        .sum(),
                ),
                _ => None,
            })
            .collect();

        let point = &mut points[index];
        let on_boundary = point.date.weekday() == week_boundary;
        point.seven_day_average = Some(sum / WINDOW as f64);
        if on_boundary {
            point.weekly_total = Some(sum);
        }
        for (field, field_sum) in point.fields.iter_mut().zip(field_sums) {
            field.seven_day_average = field_sum.map(|s| s / WINDOW as f64);
            if on_boundary {
                field.weekly_total = field_sum;
            }
        }
    }
}

impl GraphSeries {
    pub fn latest(&self) -> Option<&GraphPoint> {
        self.points.last()
    }

    /// The point `days` records before the latest one.
    pub fn back(&self, days: usize) -> Option<&GraphPoint> {
        let index = self.points.len().checked_sub(days + 1)?;
        self.points.get(index)
    }

    pub fn latest_on_boundary(&self) -> bool {
        self.latest()
            .is_some_and(|point| point.date.weekday() == self.week_boundary)
    }

    pub fn entries(&self, view: ViewKind) -> Vec<(NaiveDate, f64)> {
        match view {
            ViewKind::NewValue => self.points.iter().map(|p| (p.date, p.value)).collect(),
            ViewKind::SevenDayAverage => self
                .points
                .iter()
                .filter_map(|p| p.seven_day_average.map(|avg| (p.date, avg)))
                .collect(),
            ViewKind::ByWeekday => {
                let Some(weekday) = self.latest().map(|p| p.date.weekday()) else {
                    return Vec::new();
                };
                self.points
                    .iter()
                    .filter(|p| p.date.weekday() == weekday)
                    .map(|p| (p.date, p.value))
                    .collect()
            }
            ViewKind::WeeklyTotal => self
                .points
                .iter()
                .filter_map(|p| p.weekly_total.map(|total| (p.date, total)))
                .collect(),
        }
    }
}

impl ViewKind {
    pub fn counts_weeks(&self) -> bool {
        matches!(self, ViewKind::ByWeekday | ViewKind::WeeklyTotal)
    }

    pub fn threshold(&self, thresholds: &Thresholds) -> i64 {
        match self {
            ViewKind::NewValue => thresholds.daily_days,
            ViewKind::SevenDayAverage => thresholds.average_days,
            ViewKind::ByWeekday => thresholds.weekday_weeks,
            ViewKind::WeeklyTotal => thresholds.weekly_weeks,
        }
    }
}

/// Most recent earlier entry strictly below (or above) the final entry.
pub fn find_superlative(
    entries: &[(NaiveDate, f64)],
    direction: Direction,
    in_weeks: bool,
) -> Option<Superlative> {
    let ((today, current), history) = entries.split_last()?;

    history
        .iter()
        .rev()
        .find(|(_, value)| match direction {
            Direction::Lower => value < current,
            Direction::Higher => value > current,
        })
        .map(|(date, value)| {
            let days = (*today - *date).num_days();
            Superlative {
                direction,
                date: *date,
                value: *value,
                elapsed: if in_weeks {
                    Elapsed::Weeks(days / 7)
                } else {
                    Elapsed::Days(days)
                },
            }
        })
}

#[derive(Debug, Clone, PartialEq)]
pub enum Highlight {
    Since(Superlative),
    Record { direction: Direction, value: f64 },
}

/// Superlatives worth reporting for one view: a comparator at least
/// `threshold` away, or a strict all-time record over enough history.
pub fn highlights(entries: &[(NaiveDate, f64)], in_weeks: bool, threshold: i64) -> Vec<Highlight> {
    let Some(((_, current), history)) = entries.split_last() else {
        return Vec::new();
    };
    let enough_history = history.len() as i64 >= threshold;

    [Direction::Lower, Direction::Higher]
        .into_iter()
        .filter_map(|direction| match find_superlative(entries, direction, in_weeks) {
            Some(found) if found.elapsed.count() >= threshold => Some(Highlight::Since(found)),
            Some(_) => None,
            None => {
                let strict = history.iter().all(|(_, value)| match direction {
                    Direction::Lower => value > current,
                    Direction::Higher => value < current,
                });
                (enough_history && strict).then_some(Highlight::Record {
                    direction,
                    value: *current,
                })
            }
        })
        .collect()
}

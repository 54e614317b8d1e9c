use std::fmt::Write;

use chrono::{Datelike, NaiveDate, Weekday};

use crate::analyzer::{highlights, Highlight};
use crate::error::AnalysisError;
use crate::metrics::{MetricDefinition, Thresholds};
use crate::models::{Direction, Elapsed, GraphSeries, Narrative, ViewKind};

pub const DATE_FORMAT: &str = "%d/%m/%Y";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PercentChange {
    Ratio(f64),
    /// Previous value was zero and the current one is not.
    New,
}

impl std::fmt::Display for PercentChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PercentChange::Ratio(ratio) => write!(f, "{ratio:+.2}%"),
            PercentChange::New => f.write_str("new"),
        }
    }
}

pub fn percent_change(current: f64, previous: f64) -> PercentChange {
    if previous == 0.0 {
        if current == 0.0 {
            PercentChange::Ratio(0.0)
        } else {
            PercentChange::New
        }
    } else {
        PercentChange::Ratio((current - previous) * 100.0 / previous)
    }
}

/// `1234567.891` with 2 decimals renders as `1,234,567.89`.
pub fn format_number(value: f64, decimals: usize) -> String {
    let fixed = format!("{:.*}", decimals, value.abs());
    let (integer, fraction) = match fixed.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (fixed.as_str(), None),
    };

    let mut grouped = String::with_capacity(fixed.len() + integer.len() / 3);
    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    if let Some(fraction) = fraction {
        grouped.push('.');
        grouped.push_str(fraction);
    }

    let is_zero = fixed.chars().all(|c| c == '0' || c == '.');
    if value < 0.0 && !is_zero {
        format!("-{grouped}")
    } else {
        grouped
    }
}

fn signed(value: f64, decimals: usize) -> String {
    let formatted = format_number(value, decimals);
    if formatted.starts_with('-') {
        formatted
    } else {
        format!("+{formatted}")
    }
}

/// `+N | +N.NN%`, `-N | -N.NN%`, or `+N | new` when the base was zero.
pub fn format_delta(current: f64, previous: f64, decimals: usize) -> String {
    format!(
        "{} | {}",
        signed(current - previous, decimals),
        percent_change(current, previous)
    )
}

pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

pub fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn elapsed_text(elapsed: Elapsed) -> String {
    match elapsed {
        Elapsed::Days(1) => "1 day".to_string(),
        Elapsed::Days(n) => format!("{n} days"),
        Elapsed::Weeks(1) => "1 week".to_string(),
        Elapsed::Weeks(n) => format!("{n} weeks"),
    }
}

pub struct NarrativeBuilder {
    emoji: String,
    thresholds: Thresholds,
    url: Option<String>,
}

impl NarrativeBuilder {
    pub fn new(definition: &MetricDefinition) -> Self {
        Self {
            emoji: definition.emoji.clone(),
            thresholds: definition.thresholds,
            url: definition.url.clone(),
        }
    }

    pub fn build(&self, series: &GraphSeries, view: ViewKind) -> Result<Narrative, AnalysisError> {
        let entries = series.entries(view);
        let insufficient = |needed: usize| AnalysisError::InsufficientHistory {
            metric: series.metric.clone(),
            needed,
            found: entries.len(),
        };
        let Some(&(date, current)) = entries.last() else {
            return Err(insufficient(1));
        };
        if view == ViewKind::NewValue && entries.len() < 2 {
            return Err(insufficient(2));
        }

        let decimals = if view == ViewKind::SevenDayAverage { 2 } else { 0 };
        let label = &series.label;
        let mut status = String::new();

        let headline = match view {
            ViewKind::NewValue => format!("{} {}", capitalize(label), date.format(DATE_FORMAT)),
            ViewKind::SevenDayAverage => {
                format!("7-day average of {} {}", label, date.format(DATE_FORMAT))
            }
            ViewKind::ByWeekday => format!(
                "{} on {} {}",
                capitalize(label),
                weekday_name(date.weekday()),
                date.format(DATE_FORMAT)
            ),
            ViewKind::WeeklyTotal => format!(
                "{} in the week to {}",
                capitalize(label),
                date.format(DATE_FORMAT)
            ),
        };
        if self.emoji.is_empty() {
            let _ = write!(status, "{headline}: {}", format_number(current, decimals));
        } else {
            let _ = write!(
                status,
                "{} {headline}: {}",
                self.emoji,
                format_number(current, decimals)
            );
        }

        for (back, caption) in comparisons(view) {
            let Some(index) = entries.len().checked_sub(back + 1) else {
                continue;
            };
            let (then, previous) = entries[index];
            let caption = match caption {
                Some(caption) => caption.to_string(),
                None => then.format(DATE_FORMAT).to_string(),
            };
            let _ = write!(
                status,
                "\n{caption}: {} ({})",
                format_number(previous, decimals),
                format_delta(current, previous, decimals)
            );
        }

        if view == ViewKind::NewValue {
            if let Some(latest) = series.latest() {
                if let Some(total) = latest.running_total {
                    let _ = write!(status, "\nTotal: {}", format_number(total, 0));
                }
                for ((field, counted), value) in series
                    .field_labels
                    .iter()
                    .zip(&series.counted)
                    .zip(&latest.fields)
                {
                    if let (false, Some(raw)) = (*counted, value.raw) {
                        let _ = write!(status, "\n{field}: {}", format_number(raw, 0));
                    }
                }
            }
        }

        let threshold = view.threshold(&self.thresholds);
        let callouts = highlights(&entries, view.counts_weeks(), threshold)
            .iter()
            .map(|highlight| callout(highlight, view, label, date))
            .collect();

        Ok(Narrative {
            status,
            url: self.url.clone(),
            callouts,
        })
    }
}

/// Offsets into the view's entries and their captions; `None` captions
/// print the compared date.
fn comparisons(view: ViewKind) -> [(usize, Option<&'static str>); 2] {
    match view {
        ViewKind::NewValue => [(1, Some("Previous day")), (2, Some("Two days ago"))],
        ViewKind::SevenDayAverage => [(1, Some("Previous day")), (7, Some("A week earlier"))],
        ViewKind::ByWeekday => [(1, None), (2, None)],
        ViewKind::WeeklyTotal => [(1, Some("Previous week")), (2, Some("Two weeks ago"))],
    }
}

fn subject(view: ViewKind, label: &str, date: NaiveDate) -> String {
    match view {
        ViewKind::NewValue => label.to_string(),
        ViewKind::SevenDayAverage => format!("7-day average of {label}"),
        ViewKind::ByWeekday => format!("{label} on a {}", weekday_name(date.weekday())),
        ViewKind::WeeklyTotal => format!("weekly {label}"),
    }
}

fn callout(highlight: &Highlight, view: ViewKind, label: &str, date: NaiveDate) -> String {
    let adjective = |direction: Direction| match direction {
        Direction::Lower => "Lowest",
        Direction::Higher => "Highest",
    };
    let subject = subject(view, label, date);

    match highlight {
        Highlight::Since(found) => format!(
            "{} {subject} since {} ({})",
            adjective(found.direction),
            found.date.format(DATE_FORMAT),
            elapsed_text(found.elapsed)
        ),
        Highlight::Record { direction, .. } => {
            format!("{} {subject} on record", adjective(*direction))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::metrics::builtin;
    use crate::models::DailyRecord;
    use chrono::Duration;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 3, 1).unwrap()
    }

    fn series(values: &[f64]) -> (GraphSeries, NarrativeBuilder) {
        let definition = builtin().into_iter().find(|m| m.name == "cases").unwrap();
        let records: Vec<_> = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                DailyRecord::new(start() + Duration::days(i as i64)).with("new_cases", *v)
            })
            .collect();
        let series = analyze(&records, &definition, Weekday::Sun).unwrap();
        (series, NarrativeBuilder::new(&definition))
    }

    #[test]
    fn percentages_are_signed_with_two_decimals() {
        assert_eq!(format_delta(1234.0, 1000.0, 0), "+234 | +23.40%");
        assert_eq!(format_delta(900.0, 1000.0, 0), "-100 | -10.00%");
        assert_eq!(format_delta(12.5, 10.0, 2), "+2.50 | +25.00%");
    }

    #[test]
    fn zero_previous_never_renders_nan() {
        assert_eq!(percent_change(5.0, 0.0), PercentChange::New);
        assert_eq!(format_delta(5.0, 0.0, 0), "+5 | new");
        assert_eq!(format_delta(0.0, 0.0, 0), "+0 | +0.00%");

        let text = format_delta(-3.0, 0.0, 0);
        assert!(!text.contains("NaN") && !text.contains("inf"));
    }

    #[test]
    fn numbers_group_thousands() {
        assert_eq!(format_number(1234567.891, 2), "1,234,567.89");
        assert_eq!(format_number(999.0, 0), "999");
        assert_eq!(format_number(-1000.0, 0), "-1,000");
        assert_eq!(format_number(-0.001, 2), "0.00");
    }

    #[test]
    fn new_value_status_compares_last_two_days() {
        let (series, builder) = series(&[10.0, 0.0, 1000.0, 1234.0]);
        let narrative = builder.build(&series, ViewKind::NewValue).unwrap();

        let lines: Vec<_> = narrative.status.lines().collect();
        assert_eq!(lines[0], "🦠 New cases 04/03/2021: 1,234");
        assert_eq!(lines[1], "Previous day: 1,000 (+234 | +23.40%)");
        assert_eq!(lines[2], "Two days ago: 0 (+1,234 | new)");
        assert_eq!(lines[3], "Total: 2,244");
        assert!(!narrative.status.contains("NaN"));
    }

    #[test]
    fn average_view_uses_week_earlier_comparison() {
        let values: Vec<f64> = (1..=15).map(f64::from).collect();
        let (series, builder) = series(&values);
        let narrative = builder.build(&series, ViewKind::SevenDayAverage).unwrap();

        assert!(narrative.status.contains("7-day average of new cases 15/03/2021: 12.00"));
        assert!(narrative.status.contains("Previous day: 11.00 (+1.00 | +9.09%)"));
        assert!(narrative.status.contains("A week earlier: 5.00 (+7.00 | +140.00%)"));
    }

    #[test]
    fn weekday_view_names_the_day() {
        let values: Vec<f64> = (1..=15).map(f64::from).collect();
        let (series, builder) = series(&values);
        let narrative = builder.build(&series, ViewKind::ByWeekday).unwrap();

        assert!(narrative.status.contains("New cases on Monday 15/03/2021: 15"));
        assert!(narrative.status.contains("08/03/2021: 8 (+7 | +87.50%)"));
        assert!(narrative.status.contains("01/03/2021: 1 (+14 | +1400.00%)"));
    }

    #[test]
    fn callouts_report_long_streaks() {
        let mut values = vec![500.0; 30];
        values[5] = 10.0;
        values.push(20.0);
        let (series, builder) = series(&values);
        let narrative = builder.build(&series, ViewKind::NewValue).unwrap();

        assert_eq!(
            narrative.callouts,
            vec!["Lowest new cases since 06/03/2021 (25 days)".to_string()]
        );
    }

    #[test]
    fn missing_view_entries_are_an_error() {
        let (series, builder) = series(&[1.0, 2.0, 3.0]);
        assert!(matches!(
            builder.build(&series, ViewKind::WeeklyTotal),
            Err(AnalysisError::InsufficientHistory { .. })
        ));
    }
}

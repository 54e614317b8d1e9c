use std::fmt::Write;

use crate::error::AnalysisError;
use crate::metrics::MetricDefinition;
use crate::models::{GraphSeries, MetricSummary, ViewKind};
use crate::narrative::{capitalize, format_delta, format_number, NarrativeBuilder, DATE_FORMAT};

const VIEWS: [ViewKind; 4] = [
    ViewKind::NewValue,
    ViewKind::SevenDayAverage,
    ViewKind::ByWeekday,
    ViewKind::WeeklyTotal,
];

pub fn summarize(
    definition: &MetricDefinition,
    series: &GraphSeries,
) -> Result<MetricSummary, AnalysisError> {
    let latest = series.latest().ok_or_else(|| AnalysisError::NoData {
        metric: series.metric.clone(),
    })?;

    let week_over_week = match (latest.seven_day_average, series.back(7)) {
        (Some(current), Some(earlier)) => earlier
            .seven_day_average
            .map(|previous| format_delta(current, previous, 2)),
        _ => None,
    };

    let builder = NarrativeBuilder::new(definition);
    let mut callouts = Vec::new();
    for view in VIEWS {
        if series.entries(view).is_empty() {
            continue;
        }
        if view == ViewKind::WeeklyTotal && !series.latest_on_boundary() {
            continue;
        }
        callouts.extend(builder.build(series, view)?.callouts);
    }

    Ok(MetricSummary {
        label: series.label.clone(),
        latest_date: latest.date,
        latest_value: latest.value,
        seven_day_average: latest.seven_day_average,
        week_over_week,
        running_total: latest.running_total,
        callouts,
    })
}

pub fn build_report(summaries: &[MetricSummary], unavailable: &[(String, String)]) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Daily Bulletin");
    match summaries.iter().map(|s| s.latest_date).max() {
        Some(date) => {
            let _ = writeln!(output, "Data up to {}", date.format(DATE_FORMAT));
        }
        None => {
            let _ = writeln!(output, "No data available.");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Latest Figures");

    if summaries.is_empty() {
        let _ = writeln!(output, "No metrics could be analysed.");
    } else {
        for summary in summaries {
            let _ = write!(
                output,
                "- {}: {} on {}",
                capitalize(&summary.label),
                format_number(summary.latest_value, 0),
                summary.latest_date.format(DATE_FORMAT)
            );
            if let Some(average) = summary.seven_day_average {
                let _ = write!(output, ", 7-day average {}", format_number(average, 2));
            }
            if let Some(change) = &summary.week_over_week {
                let _ = write!(output, " ({change} week over week)");
            }
            if let Some(total) = summary.running_total {
                let _ = write!(output, ", total {}", format_number(total, 0));
            }
            let _ = writeln!(output);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Noteworthy");

    let noteworthy: Vec<&String> = summaries.iter().flat_map(|s| &s.callouts).collect();
    if noteworthy.is_empty() {
        let _ = writeln!(output, "Nothing out of the ordinary.");
    } else {
        for callout in noteworthy {
            let _ = writeln!(output, "- {callout}");
        }
    }

    if !unavailable.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Unavailable");
        for (metric, reason) in unavailable {
            let _ = writeln!(output, "- {metric}: {reason}");
        }
    }

    output
}

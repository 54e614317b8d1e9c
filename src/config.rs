use std::time::Duration;

use chrono::Weekday;
use clap::ValueEnum;

use crate::budget::StatusBudget;
use crate::chart::ChartWindow;
use crate::models::ViewKind;

pub const DEFAULT_CHART_SERVICE: &str = "https://quickchart.io/chart";

/// What a chain does when the post client reports an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FailurePolicy {
    /// Abort the chain at the failed post.
    FailStop,
    /// Log and keep going; later replies attach to the last successful post.
    DegradeAndContinue,
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub budget: StatusBudget,
    pub link: Option<String>,
    pub failure_policy: FailurePolicy,
    pub post_timeout: Duration,
    pub dry_run: bool,
    pub chart_window: ChartWindow,
    pub steps: Vec<ViewKind>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            budget: StatusBudget::default(),
            link: None,
            failure_policy: FailurePolicy::DegradeAndContinue,
            post_timeout: Duration::from_secs(30),
            dry_run: false,
            chart_window: ChartWindow::default(),
            steps: vec![
                ViewKind::NewValue,
                ViewKind::SevenDayAverage,
                ViewKind::ByWeekday,
                ViewKind::WeeklyTotal,
            ],
        }
    }
}

pub fn parse_weekday(value: &str) -> Result<Weekday, String> {
    value
        .parse::<Weekday>()
        .map_err(|_| format!("invalid weekday {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_platform_limits() {
        let config = BotConfig::default();
        assert_eq!(config.budget.limit, 280);
        assert_eq!(config.failure_policy, FailurePolicy::DegradeAndContinue);
        assert_eq!(config.steps.len(), 4);
    }

    #[test]
    fn weekdays_parse_loosely() {
        assert_eq!(parse_weekday("sun"), Ok(Weekday::Sun));
        assert_eq!(parse_weekday("Monday"), Ok(Weekday::Mon));
        assert!(parse_weekday("someday").is_err());
    }
}

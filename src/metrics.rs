use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Stored value is the day's count.
    Daily,
    /// Stored value is a running count; the day's value is the increase.
    Cumulative,
    /// Stored value is an occupancy level. No running total.
    Level,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPolicy {
    /// Absence after the series has started is an error.
    Required,
    /// Absence reads as zero in sums and averages.
    ZeroDefault,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    pub policy: FieldPolicy,
    /// Whether the field adds into the metric's combined daily value.
    #[serde(default = "default_counted")]
    pub counted: bool,
}

fn default_counted() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub daily_days: i64,
    pub average_days: i64,
    pub weekday_weeks: i64,
    pub weekly_weeks: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            daily_days: 14,
            average_days: 14,
            weekday_weeks: 3,
            weekly_weeks: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub emoji: String,
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub url: Option<String>,
}

impl MetricDefinition {
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }
}

fn field(name: &str, label: &str, kind: FieldKind, policy: FieldPolicy) -> FieldSpec {
    FieldSpec {
        name: name.to_string(),
        label: label.to_string(),
        kind,
        policy,
        counted: true,
    }
}

fn metric(name: &str, label: &str, emoji: &str, fields: Vec<FieldSpec>) -> MetricDefinition {
    MetricDefinition {
        name: name.to_string(),
        label: label.to_string(),
        emoji: emoji.to_string(),
        fields,
        thresholds: Thresholds::default(),
        url: None,
    }
}

pub fn builtin() -> Vec<MetricDefinition> {
    use FieldKind::*;
    use FieldPolicy::*;

    let cases = metric(
        "cases",
        "new cases",
        "🦠",
        vec![field("new_cases", "New cases", Daily, Required)],
    );

    let deaths = metric(
        "deaths",
        "deaths",
        "🕯️",
        vec![field("deaths", "Deaths", Cumulative, Required)],
    );

    let mut swabs = metric(
        "swabs",
        "swabs",
        "🧪",
        vec![
            field("swabs_molecular", "Molecular", Cumulative, Required),
            field("swabs_antigen", "Antigen", Cumulative, ZeroDefault),
        ],
    );
    swabs.thresholds.daily_days = 21;
    swabs.thresholds.average_days = 21;

    let hospitalised = metric(
        "hospitalised",
        "hospitalised patients",
        "🏥",
        vec![field("hospitalised", "Hospitalised", Level, Required)],
    );

    let mut icu_admissions = field("icu_admissions", "ICU admissions", Daily, ZeroDefault);
    icu_admissions.counted = false;
    let intensive_care = metric(
        "intensive_care",
        "intensive care patients",
        "🫁",
        vec![
            field("intensive_care", "Intensive care", Level, Required),
            icu_admissions,
        ],
    );

    let vaccinations = metric(
        "vaccinations",
        "vaccine doses",
        "💉",
        vec![
            field("first_doses", "First doses", Daily, ZeroDefault),
            field("second_doses", "Second doses", Daily, ZeroDefault),
            field("booster_doses", "Boosters", Daily, ZeroDefault),
        ],
    );

    vec![
        cases,
        deaths,
        swabs,
        hospitalised,
        intensive_care,
        vaccinations,
    ]
}

/// Built-in definitions, replaced wholesale by the JSON file when one is given.
pub fn load(path: Option<&Path>) -> anyhow::Result<Vec<MetricDefinition>> {
    let Some(path) = path else {
        return Ok(builtin());
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read metric definitions from {}", path.display()))?;
    let definitions: Vec<MetricDefinition> = serde_json::from_str(&raw)
        .with_context(|| format!("invalid metric definitions in {}", path.display()))?;

    anyhow::ensure!(
        !definitions.is_empty(),
        "{} defines no metrics",
        path.display()
    );
    for definition in &definitions {
        anyhow::ensure!(
            !definition.fields.is_empty(),
            "metric {} has no fields",
            definition.name
        );
    }

    Ok(definitions)
}

pub fn select<'a>(
    definitions: &'a [MetricDefinition],
    names: &[String],
) -> anyhow::Result<Vec<&'a MetricDefinition>> {
    if names.is_empty() {
        return Ok(definitions.iter().collect());
    }

    names
        .iter()
        .map(|name| {
            definitions
                .iter()
                .find(|definition| &definition.name == name)
                .with_context(|| format!("unknown metric {name}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_thresholds_match_metric_literals() {
        let metrics = builtin();
        let swabs = metrics.iter().find(|m| m.name == "swabs").unwrap();
        assert_eq!(swabs.thresholds.daily_days, 21);
        assert_eq!(swabs.thresholds.weekly_weeks, 3);

        let cases = metrics.iter().find(|m| m.name == "cases").unwrap();
        assert_eq!(cases.thresholds, Thresholds::default());
        assert_eq!(cases.thresholds.daily_days, 14);
    }

    #[test]
    fn definitions_parse_with_defaults() {
        let raw = r#"[{
            "name": "cases",
            "label": "new cases",
            "fields": [{"name": "new_cases", "label": "New", "kind": "daily", "policy": "required"}]
        }]"#;
        let definitions: Vec<MetricDefinition> = serde_json::from_str(raw).unwrap();
        assert!(definitions[0].fields[0].counted);
        assert_eq!(definitions[0].thresholds.average_days, 14);
    }

    #[test]
    fn select_rejects_unknown_names() {
        let metrics = builtin();
        assert_eq!(select(&metrics, &[]).unwrap().len(), metrics.len());
        assert!(select(&metrics, &["rainfall".to_string()]).is_err());
    }
}

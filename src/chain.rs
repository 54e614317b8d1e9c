use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::chart::build_chart;
use crate::config::{BotConfig, FailurePolicy};
use crate::error::{AnalysisError, ChainError};
use crate::metrics::MetricDefinition;
use crate::models::{GraphSeries, PostedStatus, ViewKind};
use crate::narrative::NarrativeBuilder;
use crate::publish::{ChartRenderer, OutgoingPost, PostClient};
use crate::records::RecordsAccumulator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChainStep {
    View(ViewKind),
    RecordsFlush,
    Done,
}

impl fmt::Display for ChainStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChainStep::View(ViewKind::NewValue) => "new_value",
            ChainStep::View(ViewKind::SevenDayAverage) => "seven_day_average",
            ChainStep::View(ViewKind::ByWeekday) => "by_weekday",
            ChainStep::View(ViewKind::WeeklyTotal) => "weekly_total",
            ChainStep::RecordsFlush => "records_flush",
            ChainStep::Done => "done",
        };
        f.write_str(name)
    }
}

/// Mutable state of one chain run. Owned by that run and dropped with it.
struct PostChainState {
    run_id: Uuid,
    step: ChainStep,
    reply_to: Option<String>,
    records: RecordsAccumulator,
    posts: Vec<PostedStatus>,
    failures: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainReport {
    pub run_id: Uuid,
    pub metric: String,
    pub data_date: NaiveDate,
    pub posts: Vec<PostedStatus>,
    pub failures: usize,
    pub final_step: ChainStep,
}

impl ChainReport {
    /// A run settles its data date only when every planned post went out.
    /// Partial or empty runs stay eligible for the next scheduled attempt.
    pub fn is_complete(&self) -> bool {
        self.failures == 0 && !self.posts.is_empty()
    }
}

pub struct PostChain {
    config: BotConfig,
    renderer: Arc<dyn ChartRenderer>,
    client: Arc<dyn PostClient>,
}

impl PostChain {
    pub fn new(
        config: BotConfig,
        renderer: Arc<dyn ChartRenderer>,
        client: Arc<dyn PostClient>,
    ) -> Self {
        Self {
            config,
            renderer,
            client,
        }
    }

    fn plan(&self) -> Vec<ChainStep> {
        self.config
            .steps
            .iter()
            .map(|view| ChainStep::View(*view))
            .chain([ChainStep::RecordsFlush, ChainStep::Done])
            .collect()
    }

    /// Posts every view of one metric as a reply thread, then the records
    /// that overflowed along the way.
    pub async fn run(
        &self,
        definition: &MetricDefinition,
        series: &GraphSeries,
    ) -> Result<ChainReport, ChainError> {
        let latest = series.latest().ok_or_else(|| AnalysisError::NoData {
            metric: series.metric.clone(),
        })?;
        let data_date = latest.date;

        let mut state = PostChainState {
            run_id: Uuid::new_v4(),
            step: ChainStep::View(ViewKind::NewValue),
            reply_to: None,
            records: RecordsAccumulator::new(self.config.budget.hashtag.clone()),
            posts: Vec::new(),
            failures: 0,
        };
        let span = info_span!(
            "chain",
            metric = %series.metric,
            run_id = %state.run_id,
            dry_run = self.config.dry_run
        );

        let report: Result<ChainReport, ChainError> = async move {
            let builder = NarrativeBuilder::new(definition);

            for step in self.plan() {
                state.step = step;
                match step {
                    ChainStep::View(ViewKind::WeeklyTotal) if !series.latest_on_boundary() => {
                        debug!(%data_date, "not a week boundary, no weekly post");
                    }
                    ChainStep::View(view) => {
                        self.post_view(&mut state, &builder, series, view).await?;
                    }
                    ChainStep::RecordsFlush => self.flush_records(&mut state).await?,
                    ChainStep::Done => {}
                }
            }

            info!(
                posts = state.posts.len(),
                failures = state.failures,
                "chain complete"
            );
            Ok(ChainReport {
                run_id: state.run_id,
                metric: series.metric.clone(),
                data_date,
                posts: state.posts,
                failures: state.failures,
                final_step: state.step,
            })
        }
        .instrument(span)
        .await;
        report
    }

    async fn post_view(
        &self,
        state: &mut PostChainState,
        builder: &NarrativeBuilder,
        series: &GraphSeries,
        view: ViewKind,
    ) -> Result<(), ChainError> {
        let step = state.step;
        if series.entries(view).is_empty() {
            info!(%step, "not enough history for this view");
            return Ok(());
        }

        let narrative = builder.build(series, view)?;
        let chart = build_chart(series, view, self.config.chart_window);
        let images = if self.config.dry_run {
            Vec::new()
        } else {
            let image = self
                .renderer
                .render(&chart)
                .await
                .map_err(|source| ChainError::Render {
                    step: step.to_string(),
                    source,
                })?;
            vec![image]
        };

        let link = narrative.url.as_deref().or(self.config.link.as_deref());
        let budget = &self.config.budget;
        let (body, overflow) = budget.fill(&narrative.status, narrative.callouts, link);
        if !overflow.is_empty() {
            debug!(%step, queued = overflow.len(), "callouts moved to records");
            state.records.extend(overflow);
        }

        let Some(text) = budget.compose(&body, link) else {
            warn!(%step, length = body.chars().count(), "status over budget, not posted");
            return Ok(());
        };
        let alt_text = chart.options.plugins.title.text.clone();
        self.submit(state, text, images, Some(alt_text)).await
    }

    async fn flush_records(&self, state: &mut PostChainState) -> Result<(), ChainError> {
        if state.records.is_empty() {
            return Ok(());
        }
        let posts = state.records.drain_into(self.config.budget.limit);
        for text in posts {
            self.submit(state, text, Vec::new(), None).await?;
        }
        Ok(())
    }

    async fn submit(
        &self,
        state: &mut PostChainState,
        text: String,
        images: Vec<Vec<u8>>,
        alt_text: Option<String>,
    ) -> Result<(), ChainError> {
        let step = state.step;
        let reply_to = state.reply_to.clone();

        if self.config.dry_run {
            let post_id = format!("dry-run-{}", state.posts.len() + 1);
            debug!(%step, %post_id, "dry run, nothing sent");
            state.posts.push(PostedStatus {
                step: step.to_string(),
                text,
                post_id: post_id.clone(),
                reply_to,
            });
            state.reply_to = Some(post_id);
            return Ok(());
        }

        let post = OutgoingPost {
            text: text.clone(),
            images,
            alt_text,
            reply_to: reply_to.clone(),
        };
        let timeout = self.config.post_timeout;

        match tokio::time::timeout(timeout, self.client.submit(post)).await {
            Err(_) => Err(ChainError::Timeout {
                step: step.to_string(),
                millis: timeout.as_millis(),
            }),
            Ok(Ok(post_id)) => {
                info!(%step, %post_id, reply_to = ?reply_to, "posted");
                state.posts.push(PostedStatus {
                    step: step.to_string(),
                    text,
                    post_id: post_id.clone(),
                    reply_to,
                });
                state.reply_to = Some(post_id);
                Ok(())
            }
            Ok(Err(source)) => match self.config.failure_policy {
                FailurePolicy::FailStop => Err(ChainError::Submit {
                    step: step.to_string(),
                    source,
                }),
                FailurePolicy::DegradeAndContinue => {
                    warn!(
                        %step,
                        error = %source,
                        reply_to = ?reply_to,
                        "post failed, next reply keeps the previous parent"
                    );
                    state.failures += 1;
                    Ok(())
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::budget::StatusBudget;
    use crate::chart::ChartConfig;
    use crate::metrics::builtin;
    use crate::models::DailyRecord;
    use async_trait::async_trait;
    use chrono::{Duration, Weekday};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingRenderer {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ChartRenderer for CountingRenderer {
        async fn render(&self, _config: &ChartConfig) -> anyhow::Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("renderer offline");
            }
            Ok(vec![0x89, 0x50, 0x4e, 0x47])
        }
    }

    #[derive(Default)]
    struct RecordingClient {
        posts: Mutex<Vec<OutgoingPost>>,
        fail_on: Option<usize>,
        fail_all: bool,
        delay: Option<std::time::Duration>,
    }

    impl RecordingClient {
        fn count(&self) -> usize {
            self.posts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PostClient for RecordingClient {
        async fn submit(&self, post: OutgoingPost) -> anyhow::Result<String> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let mut posts = self.posts.lock().unwrap();
            posts.push(post);
            let n = posts.len();
            if self.fail_all || self.fail_on == Some(n) {
                anyhow::bail!("upstream error");
            }
            Ok(format!("post-{n}"))
        }
    }

    fn cases() -> MetricDefinition {
        builtin().into_iter().find(|m| m.name == "cases").unwrap()
    }

    /// Starts on Monday 2021-03-01.
    fn series(values: &[f64]) -> GraphSeries {
        let start = NaiveDate::from_ymd_opt(2021, 3, 1).unwrap();
        let records: Vec<_> = values
            .iter()
            .enumerate()
            .map(|(i, v)| DailyRecord::new(start + Duration::days(i as i64)).with("new_cases", *v))
            .collect();
        analyze(&records, &cases(), Weekday::Sun).unwrap()
    }

    fn chain(
        config: BotConfig,
        renderer: &Arc<CountingRenderer>,
        client: &Arc<RecordingClient>,
    ) -> PostChain {
        PostChain::new(config, renderer.clone(), client.clone())
    }

    fn ramp(days: usize) -> Vec<f64> {
        (0..days).map(|i| 100.0 + i as f64).collect()
    }

    #[tokio::test]
    async fn dry_run_walks_every_step_without_collaborators() {
        let renderer = Arc::new(CountingRenderer::default());
        let client = Arc::new(RecordingClient::default());
        let config = BotConfig {
            dry_run: true,
            steps: vec![
                ViewKind::NewValue,
                ViewKind::SevenDayAverage,
                ViewKind::ByWeekday,
            ],
            ..BotConfig::default()
        };

        let report = chain(config, &renderer, &client)
            .run(&cases(), &series(&ramp(10)))
            .await
            .unwrap();

        assert_eq!(report.final_step, ChainStep::Done);
        assert_eq!(report.posts.len(), 3);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(client.count(), 0);

        let ids: Vec<_> = report.posts.iter().map(|p| p.post_id.as_str()).collect();
        assert_eq!(ids, vec!["dry-run-1", "dry-run-2", "dry-run-3"]);
        assert_eq!(report.posts[0].reply_to, None);
        assert_eq!(report.posts[2].reply_to.as_deref(), Some("dry-run-2"));
    }

    #[tokio::test]
    async fn replies_thread_through_platform_ids() {
        let renderer = Arc::new(CountingRenderer::default());
        let client = Arc::new(RecordingClient::default());

        // 17 days ends on a Wednesday: no weekly post
        let report = chain(BotConfig::default(), &renderer, &client)
            .run(&cases(), &series(&ramp(17)))
            .await
            .unwrap();

        let steps: Vec<_> = report.posts.iter().map(|p| p.step.as_str()).collect();
        assert_eq!(steps, vec!["new_value", "seven_day_average", "by_weekday"]);
        assert!(report.is_complete());
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 3);

        let sent = client.posts.lock().unwrap();
        assert_eq!(sent[0].reply_to, None);
        assert_eq!(sent[1].reply_to.as_deref(), Some("post-1"));
        assert_eq!(sent[2].reply_to.as_deref(), Some("post-2"));
        assert!(sent.iter().all(|post| post.images.len() == 1));
    }

    #[tokio::test]
    async fn weekly_total_posts_on_the_boundary() {
        let renderer = Arc::new(CountingRenderer::default());
        let client = Arc::new(RecordingClient::default());

        // 14 days ends on Sunday 2021-03-14
        let report = chain(BotConfig::default(), &renderer, &client)
            .run(&cases(), &series(&ramp(14)))
            .await
            .unwrap();

        let last = report.posts.last().unwrap();
        assert_eq!(last.step, "weekly_total");
        assert!(last.text.contains("in the week to 14/03/2021"));
        assert_eq!(report.posts.len(), 4);
    }

    #[tokio::test]
    async fn degraded_chain_replies_to_last_good_post() {
        let renderer = Arc::new(CountingRenderer::default());
        let client = Arc::new(RecordingClient {
            fail_on: Some(2),
            ..RecordingClient::default()
        });

        let report = chain(BotConfig::default(), &renderer, &client)
            .run(&cases(), &series(&ramp(17)))
            .await
            .unwrap();

        assert_eq!(report.failures, 1);
        assert_eq!(report.posts.len(), 2);
        assert_eq!(report.posts[1].post_id, "post-3");
        assert_eq!(report.posts[1].reply_to.as_deref(), Some("post-1"));
        assert_eq!(report.final_step, ChainStep::Done);
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn outage_leaves_the_run_incomplete() {
        let renderer = Arc::new(CountingRenderer::default());
        let client = Arc::new(RecordingClient {
            fail_all: true,
            ..RecordingClient::default()
        });

        let report = chain(BotConfig::default(), &renderer, &client)
            .run(&cases(), &series(&ramp(17)))
            .await
            .unwrap();

        assert!(report.posts.is_empty());
        assert_eq!(report.failures, client.count());
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn status_over_budget_is_skipped_and_thread_continues() {
        let renderer = Arc::new(CountingRenderer::default());
        let client = Arc::new(RecordingClient::default());
        // the 7-day average status runs to about 125 chars, the others near 100
        let config = BotConfig {
            budget: StatusBudget::new(115, None),
            steps: vec![
                ViewKind::NewValue,
                ViewKind::SevenDayAverage,
                ViewKind::ByWeekday,
            ],
            ..BotConfig::default()
        };

        let report = chain(config, &renderer, &client)
            .run(&cases(), &series(&ramp(17)))
            .await
            .unwrap();

        assert_eq!(report.failures, 0);
        assert!(report.posts.iter().all(|p| p.step != "seven_day_average"));
        assert_eq!(report.posts[0].step, "new_value");
        assert_eq!(report.posts[1].step, "by_weekday");
        assert_eq!(report.posts[1].reply_to.as_deref(), Some("post-1"));
        assert_eq!(report.final_step, ChainStep::Done);
    }

    #[tokio::test]
    async fn fail_stop_aborts_at_the_failed_post() {
        let renderer = Arc::new(CountingRenderer::default());
        let client = Arc::new(RecordingClient {
            fail_on: Some(2),
            ..RecordingClient::default()
        });
        let config = BotConfig {
            failure_policy: FailurePolicy::FailStop,
            ..BotConfig::default()
        };

        let err = chain(config, &renderer, &client)
            .run(&cases(), &series(&ramp(17)))
            .await
            .unwrap_err();

        assert!(matches!(err, ChainError::Submit { ref step, .. } if step == "seven_day_average"));
        assert_eq!(client.count(), 2);
    }

    #[tokio::test]
    async fn timeouts_end_the_chain() {
        let renderer = Arc::new(CountingRenderer::default());
        let client = Arc::new(RecordingClient {
            delay: Some(std::time::Duration::from_secs(5)),
            ..RecordingClient::default()
        });
        let config = BotConfig {
            post_timeout: std::time::Duration::from_millis(20),
            ..BotConfig::default()
        };

        let err = chain(config, &renderer, &client)
            .run(&cases(), &series(&ramp(17)))
            .await
            .unwrap_err();

        assert!(matches!(err, ChainError::Timeout { ref step, .. } if step == "new_value"));
    }

    #[tokio::test]
    async fn render_failures_are_fatal() {
        let renderer = Arc::new(CountingRenderer {
            fail: true,
            ..CountingRenderer::default()
        });
        let client = Arc::new(RecordingClient::default());

        let err = chain(BotConfig::default(), &renderer, &client)
            .run(&cases(), &series(&ramp(17)))
            .await
            .unwrap_err();

        assert!(matches!(err, ChainError::Render { .. }));
        assert_eq!(client.count(), 0);
    }

    #[tokio::test]
    async fn overflowing_callouts_become_trailing_replies() {
        let mut values = vec![500.0; 30];
        values[5] = 10.0;
        values.push(20.0);
        let renderer = Arc::new(CountingRenderer::default());
        let client = Arc::new(RecordingClient::default());
        let config = BotConfig {
            budget: StatusBudget::new(140, None),
            steps: vec![ViewKind::NewValue],
            ..BotConfig::default()
        };

        let report = chain(config, &renderer, &client)
            .run(&cases(), &series(&values))
            .await
            .unwrap();

        assert_eq!(report.posts.len(), 2);
        let flush = &report.posts[1];
        assert_eq!(flush.step, "records_flush");
        assert_eq!(flush.text, "Lowest new cases since 06/03/2021 (25 days)");
        assert_eq!(flush.reply_to.as_deref(), Some("post-1"));
        assert!(client.posts.lock().unwrap()[1].images.is_empty());
    }

    #[tokio::test]
    async fn callouts_stay_inline_when_they_fit() {
        let mut values = vec![500.0; 30];
        values[5] = 10.0;
        values.push(20.0);
        let renderer = Arc::new(CountingRenderer::default());
        let client = Arc::new(RecordingClient::default());
        let config = BotConfig {
            steps: vec![ViewKind::NewValue],
            ..BotConfig::default()
        };

        let report = chain(config, &renderer, &client)
            .run(&cases(), &series(&values))
            .await
            .unwrap();

        assert_eq!(report.posts.len(), 1);
        assert!(report.posts[0]
            .text
            .ends_with("Lowest new cases since 06/03/2021 (25 days)"));
    }

    #[tokio::test]
    async fn metrics_run_independently() {
        let renderer = Arc::new(CountingRenderer::default());
        let client = Arc::new(RecordingClient::default());
        let config = BotConfig {
            dry_run: true,
            ..BotConfig::default()
        };
        let chain = chain(config, &renderer, &client);
        let first = series(&ramp(17));
        let second = series(&ramp(20));
        let definition = cases();

        let (a, b) = tokio::join!(chain.run(&definition, &first), chain.run(&definition, &second));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a.run_id, b.run_id);
        assert_eq!(a.posts[0].post_id, "dry-run-1");
        assert_eq!(b.posts[0].post_id, "dry-run-1");
    }
}

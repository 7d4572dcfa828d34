use std::{future::Future, sync::Arc};

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::{
    Batch, BatchFailure, BatchStage, CrawlOutcome, CrawlProgress, CrawlSummary, CrawlerConfig,
    DEFAULT_QUOTA_LIMIT, FailurePolicy, FetchError, PersistError, ProgressStore, QuotaTracker,
    RepositoryCrawler, RepositoryFetcher, RepositoryPersister, RepositoryRecord, Retrier,
    RetryError, RetryPolicy, ShutdownSignal, StdResult,
};

/// Items covered by one quota unit of a search request.
const ITEMS_PER_QUOTA_UNIT: u32 = 100;

/// The quota units a batch is expected to consume.
fn estimated_cost(batch: &Batch) -> u32 {
    batch.size().div_ceil(ITEMS_PER_QUOTA_UNIT).max(1)
}

/// Counters of a batch that went through every stage.
#[derive(Debug, Default, PartialEq, Eq)]
struct BatchReport {
    processed: u32,
    upserted: u32,
    dropped: u32,
}

/// A batch that left the pipeline early.
#[derive(Debug)]
struct BatchError {
    failure: BatchFailure,
    is_fatal: bool,
}

impl BatchError {
    fn new<E: std::fmt::Display>(batch: &Batch, stage: BatchStage, error: RetryError<E>) -> Self {
        Self {
            is_fatal: error.is_fatal(),
            failure: BatchFailure::new(batch, stage, error.to_string()),
        }
    }
}

/// A crawler that walks the target in fixed-size batches, strictly in offset order.
///
/// Each batch reserves quota, is fetched and mapped, then upserted. The cursor only moves
/// past a batch once its outcome is known, and is saved after every batch.
pub struct BatchCrawler {
    fetcher: Arc<dyn RepositoryFetcher>,
    persister: Arc<dyn RepositoryPersister>,
    progress_store: Arc<dyn ProgressStore>,
    quota: Arc<QuotaTracker>,
    retrier: Retrier,
    config: CrawlerConfig,
    shutdown: Arc<ShutdownSignal>,
}

impl BatchCrawler {
    /// Creates a new `BatchCrawler` instance.
    pub fn new(
        fetcher: Arc<dyn RepositoryFetcher>,
        persister: Arc<dyn RepositoryPersister>,
        progress_store: Arc<dyn ProgressStore>,
        config: CrawlerConfig,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        Self {
            fetcher,
            persister,
            progress_store,
            quota: Arc::new(QuotaTracker::new(DEFAULT_QUOTA_LIMIT, config.safety_buffer)),
            retrier: Retrier::new(RetryPolicy::from(&config)),
            config,
            shutdown,
        }
    }

    /// Loads the stored progress, or starts from scratch.
    async fn load_progress(&self, target_total: u32) -> StdResult<CrawlProgress> {
        match self.progress_store.load().await? {
            Some(mut progress) => {
                if progress.target_total != target_total {
                    info!(
                        "Stored target {} replaced by {target_total}",
                        progress.target_total
                    );
                    progress.target_total = target_total;
                }
                info!("Resuming crawl: {progress}");

                Ok(progress)
            }
            None => Ok(CrawlProgress::start(target_total)),
        }
    }

    /// Seeds the quota tracker with the counters of the server.
    async fn preflight_quota(&self) -> Result<(), RetryError<FetchError>> {
        let fetcher = &self.fetcher;
        match self
            .retrier
            .run(
                "Quota check",
                move || async move { fetcher.quota().await },
                FetchError::class,
            )
            .await
        {
            Ok(snapshot) => {
                info!("Starting with {snapshot}");
                self.quota.update(&snapshot).await;
                Ok(())
            }
            Err(error) if error.is_fatal() => Err(error),
            Err(error) => {
                warn!("Quota check failed ({error}), starting with a full quota estimate");
                Ok(())
            }
        }
    }

    /// Runs `task` unless a stop is requested first.
    async fn unless_stopped<F: Future>(&self, task: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.shutdown.wait() => None,
            output = task => Some(output),
        }
    }

    async fn count_repositories(&self) -> Option<u64> {
        match self.persister.count().await {
            Ok(total) => Some(total),
            Err(error) => {
                warn!("Could not count stored repositories: {error}");
                None
            }
        }
    }

    /// Drives one batch from quota reservation to persistence.
    async fn process_batch(&self, batch: Batch) -> Result<BatchReport, BatchError> {
        let cost = estimated_cost(&batch);
        let quota = &self.quota;
        let fetcher = &self.fetcher;
        let response = self
            .retrier
            .run(
                &format!("Fetch of {batch}"),
                move || async move {
                    quota.reserve(cost).await;
                    debug!("{batch} {}", BatchStage::Reserved);
                    fetcher.fetch(&batch).await
                },
                FetchError::class,
            )
            .await
            .map_err(|error| BatchError::new(&batch, BatchStage::Fetched, error))?;
        self.quota.update(response.quota()).await;
        debug!("{batch} {}", BatchStage::Fetched);

        let crawled_at = Utc::now();
        let mut report = BatchReport {
            processed: response.items().len() as u32,
            ..BatchReport::default()
        };
        let mut records = Vec::with_capacity(response.items().len());
        for item in response.items() {
            match RepositoryRecord::try_from_raw(item, crawled_at) {
                Ok(record) => records.push(record),
                Err(error) => {
                    warn!("Dropped item {item:?} of {batch}: {error}");
                    report.dropped += 1;
                }
            }
        }
        debug!("{batch} {}", BatchStage::Transformed);
        if records.is_empty() {
            info!("No repositories to persist for {batch}");
            return Ok(report);
        }

        let persister = &self.persister;
        let records = &records;
        report.upserted = self
            .retrier
            .run(
                &format!("Upsert of {batch}"),
                move || async move { persister.upsert(records).await },
                PersistError::class,
            )
            .await
            .map_err(|error| BatchError::new(&batch, BatchStage::Persisted, error))?;
        debug!("{batch} {}", BatchStage::Persisted);

        Ok(report)
    }

    /// Records the final state of the run.
    async fn finish(
        &self,
        mut summary: CrawlSummary,
        progress: CrawlProgress,
        count_before: Option<u64>,
    ) -> StdResult<CrawlSummary> {
        self.progress_store.save(&progress).await?;
        summary.progress = progress;
        if let Some(before) = count_before {
            summary.new_repositories = self
                .count_repositories()
                .await
                .map(|after| after.saturating_sub(before));
        }
        for failure in &summary.failed_batches {
            warn!("{failure}");
        }
        self.progress_store.save_summary(&summary).await?;

        Ok(summary)
    }
}

#[async_trait::async_trait]
impl RepositoryCrawler for BatchCrawler {
    async fn crawl(&self, target_total: u32) -> StdResult<CrawlSummary> {
        let mut progress = self.load_progress(target_total).await?;
        let mut summary = CrawlSummary::new(progress.clone());

        match self.unless_stopped(self.preflight_quota()).await {
            Some(Ok(())) => {}
            Some(Err(error)) => {
                error!("Crawl aborted before the first batch: {error}");
                summary.outcome = CrawlOutcome::Aborted {
                    reason: error.to_string(),
                };
                return self.finish(summary, progress, None).await;
            }
            None => {
                warn!("Stop requested before the first batch");
                summary.outcome = CrawlOutcome::Interrupted;
                return self.finish(summary, progress, None).await;
            }
        }
        let count_before = self
            .unless_stopped(self.count_repositories())
            .await
            .flatten();

        while let Some(batch) =
            Batch::next(progress.cursor, target_total, self.config.max_batch_size)
        {
            if self.shutdown.is_requested() {
                warn!("Stop requested, {batch} not started");
                summary.outcome = CrawlOutcome::Interrupted;
                break;
            }

            info!("Processing {batch} ({})", BatchStage::Pending);
            let Some(result) = self.unless_stopped(self.process_batch(batch)).await else {
                warn!("Stop requested, {batch} abandoned");
                summary.outcome = CrawlOutcome::Interrupted;
                break;
            };

            match result {
                Ok(report) => {
                    summary.processed += report.processed;
                    summary.upserted += report.upserted;
                    summary.dropped += report.dropped;
                    progress.advance_past(&batch, true);
                    debug!("{batch} {}", BatchStage::Advanced);
                }
                Err(BatchError { failure, is_fatal }) => {
                    error!("{failure}");
                    let reason = failure.to_string();
                    summary.failed_batches.push(failure);
                    if is_fatal || self.config.failure_policy == FailurePolicy::Abort {
                        summary.outcome = CrawlOutcome::Aborted { reason };
                        break;
                    }
                    progress.advance_past(&batch, false);
                }
            }
            self.progress_store.save(&progress).await?;
            warn!(
                "{progress}, processed={}, upserted={}, dropped={}, failed_batches={}, {}",
                summary.processed,
                summary.upserted,
                summary.dropped,
                summary.failed_batches.len(),
                self.quota.status().await
            );
        }

        let summary = self.finish(summary, progress, count_before).await?;
        info!("{summary}");

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockall::{Sequence, predicate::eq};

    use crate::{
        FetchResponse, JsonFileProgressStore, MockProgressStore, MockRepositoryFetcher,
        MockRepositoryPersister, QuotaSnapshot, RawRepository,
    };

    use super::*;

    fn response_for(batch: &Batch) -> FetchResponse {
        let items = (batch.start_offset()..batch.end_offset())
            .map(|id| RawRepository::new(i64::from(id) + 1, &format!("org/repository-{id}"), 10))
            .collect();

        FetchResponse::new(items, QuotaSnapshot::dummy())
    }

    fn fetcher_with_quota() -> MockRepositoryFetcher {
        let mut fetcher = MockRepositoryFetcher::new();
        fetcher
            .expect_quota()
            .returning(|| Ok(QuotaSnapshot::dummy()));

        fetcher
    }

    fn persister_with_count() -> MockRepositoryPersister {
        let mut persister = MockRepositoryPersister::new();
        persister.expect_count().returning(|| Ok(0));

        persister
    }

    fn empty_progress_store() -> MockProgressStore {
        let mut store = MockProgressStore::new();
        store.expect_load().returning(|| Ok(None));
        store.expect_save().returning(|_| Ok(()));
        store.expect_save_summary().returning(|_| Ok(()));

        store
    }

    fn crawler(
        fetcher: MockRepositoryFetcher,
        persister: MockRepositoryPersister,
        failure_policy: FailurePolicy,
    ) -> BatchCrawler {
        BatchCrawler::new(
            Arc::new(fetcher),
            Arc::new(persister),
            Arc::new(empty_progress_store()),
            CrawlerConfig {
                failure_policy,
                ..CrawlerConfig::dummy()
            },
            ShutdownSignal::shared(),
        )
    }

    #[test]
    fn estimated_cost_is_one_unit_per_page() {
        assert_eq!(1, estimated_cost(&Batch::new(0, 1)));
        assert_eq!(1, estimated_cost(&Batch::new(0, 100)));
        assert_eq!(2, estimated_cost(&Batch::new(0, 150)));
    }

    #[tokio::test]
    async fn crawler_dispatches_batches_in_offset_order() {
        let fetcher = {
            let mut fetcher = fetcher_with_quota();
            let mut sequence = Sequence::new();
            for offset in [0, 100, 200] {
                fetcher
                    .expect_fetch()
                    .with(eq(Batch::new(offset, 100)))
                    .times(1)
                    .in_sequence(&mut sequence)
                    .returning(|batch| Ok(response_for(batch)));
            }

            fetcher
        };
        let persister = {
            let mut persister = persister_with_count();
            persister
                .expect_upsert()
                .returning(|records| Ok(records.len() as u32))
                .times(3);

            persister
        };
        let crawler = crawler(fetcher, persister, FailurePolicy::Skip);

        let summary = crawler.crawl(300).await.unwrap();

        assert_eq!(CrawlOutcome::Completed, summary.outcome);
        assert!(summary.is_success());
        assert_eq!(300, summary.processed);
        assert_eq!(300, summary.upserted);
        assert_eq!(300, summary.progress.cursor);
        assert_eq!(3, summary.progress.completed_batches);
    }

    #[tokio::test]
    async fn crawler_retries_rate_limited_fetches() {
        let fetcher = {
            let mut fetcher = fetcher_with_quota();
            fetcher
                .expect_fetch()
                .returning(|_| Err(FetchError::RateLimited("API rate limit exceeded".to_string())))
                .times(2);
            fetcher
                .expect_fetch()
                .returning(|batch| Ok(response_for(batch)))
                .times(1);

            fetcher
        };
        let persister = {
            let mut persister = persister_with_count();
            persister
                .expect_upsert()
                .returning(|records| Ok(records.len() as u32))
                .times(1);

            persister
        };
        let crawler = crawler(fetcher, persister, FailurePolicy::Skip);

        let summary = crawler.crawl(100).await.unwrap();

        assert!(summary.failed_batches.is_empty());
        assert_eq!(CrawlOutcome::Completed, summary.outcome);
        assert_eq!(100, summary.upserted);
    }

    #[tokio::test]
    async fn crawler_aborts_on_constraint_violation_without_retrying() {
        let fetcher = {
            let mut fetcher = fetcher_with_quota();
            fetcher
                .expect_fetch()
                .returning(|batch| Ok(response_for(batch)))
                .times(1);

            fetcher
        };
        let persister = {
            let mut persister = persister_with_count();
            persister
                .expect_upsert()
                .returning(|_| {
                    Err(PersistError::ConstraintViolation(
                        "UNIQUE constraint failed: repositories.full_name".to_string(),
                    ))
                })
                .times(1);

            persister
        };
        let crawler = crawler(fetcher, persister, FailurePolicy::Abort);

        let summary = crawler.crawl(300).await.unwrap();

        assert!(matches!(summary.outcome, CrawlOutcome::Aborted { .. }));
        assert_eq!(1, summary.failed_batches.len());
        assert_eq!(BatchStage::Persisted, summary.failed_batches[0].stage);
        assert_eq!(0, summary.failed_batches[0].offset);
        assert_eq!(0, summary.progress.cursor);
    }

    #[tokio::test]
    async fn crawler_aborts_on_fatal_fetch_error_even_when_skipping() {
        let fetcher = {
            let mut fetcher = fetcher_with_quota();
            fetcher
                .expect_fetch()
                .returning(|_| Err(FetchError::Auth("Bad credentials".to_string())))
                .times(1);

            fetcher
        };
        let crawler = crawler(fetcher, persister_with_count(), FailurePolicy::Skip);

        let summary = crawler.crawl(300).await.unwrap();

        assert!(matches!(summary.outcome, CrawlOutcome::Aborted { .. }));
        assert_eq!(BatchStage::Fetched, summary.failed_batches[0].stage);
        assert_eq!(0, summary.progress.cursor);
    }

    #[tokio::test]
    async fn crawler_drops_unmappable_items_without_failing_the_batch() {
        let fetcher = {
            let mut fetcher = fetcher_with_quota();
            fetcher
                .expect_fetch()
                .returning(|batch| {
                    let response = response_for(batch);
                    let mut items = response.items().to_vec();
                    items[42].stargazer_count = None;

                    Ok(FetchResponse::new(items, QuotaSnapshot::dummy()))
                })
                .times(1);

            fetcher
        };
        let persister = {
            let mut persister = persister_with_count();
            persister
                .expect_upsert()
                .withf(|records| records.len() == 99)
                .returning(|records| Ok(records.len() as u32))
                .times(1);

            persister
        };
        let crawler = crawler(fetcher, persister, FailurePolicy::Skip);

        let summary = crawler.crawl(100).await.unwrap();

        assert!(summary.is_success());
        assert_eq!(100, summary.processed);
        assert_eq!(99, summary.upserted);
        assert_eq!(1, summary.dropped);
        assert_eq!(1, summary.progress.completed_batches);
    }

    #[tokio::test]
    async fn crawler_skips_batch_with_exhausted_retries() {
        let fetcher = {
            let mut fetcher = fetcher_with_quota();
            fetcher
                .expect_fetch()
                .with(eq(Batch::new(0, 100)))
                .returning(|_| Err(FetchError::Network("HTTP 502".to_string())))
                .times(5);
            fetcher
                .expect_fetch()
                .with(eq(Batch::new(100, 100)))
                .returning(|batch| Ok(response_for(batch)))
                .times(1);

            fetcher
        };
        let persister = {
            let mut persister = persister_with_count();
            persister
                .expect_upsert()
                .returning(|records| Ok(records.len() as u32))
                .times(1);

            persister
        };
        let crawler = crawler(fetcher, persister, FailurePolicy::Skip);

        let summary = crawler.crawl(200).await.unwrap();

        assert_eq!(CrawlOutcome::Completed, summary.outcome);
        assert!(!summary.is_success());
        assert_eq!(
            vec![(0, BatchStage::Fetched)],
            summary
                .failed_batches
                .iter()
                .map(|failure| (failure.offset, failure.stage))
                .collect::<Vec<_>>()
        );
        assert_eq!(200, summary.progress.cursor);
        assert_eq!(1, summary.progress.completed_batches);
    }

    #[tokio::test]
    async fn crawler_aborts_on_exhausted_retries_with_abort_policy() {
        let fetcher = {
            let mut fetcher = fetcher_with_quota();
            fetcher
                .expect_fetch()
                .returning(|batch| Ok(response_for(batch)))
                .times(1);

            fetcher
        };
        let persister = {
            let mut persister = persister_with_count();
            persister
                .expect_upsert()
                .returning(|_| Err(PersistError::Connection("database is locked".to_string())))
                .times(5);

            persister
        };
        let crawler = crawler(fetcher, persister, FailurePolicy::Abort);

        let summary = crawler.crawl(200).await.unwrap();

        assert!(matches!(summary.outcome, CrawlOutcome::Aborted { .. }));
        assert_eq!(BatchStage::Persisted, summary.failed_batches[0].stage);
        assert_eq!(0, summary.progress.cursor);
    }

    #[tokio::test]
    async fn crawler_aborts_when_credentials_are_rejected_upfront() {
        let fetcher = {
            let mut fetcher = MockRepositoryFetcher::new();
            fetcher
                .expect_quota()
                .returning(|| Err(FetchError::Auth("Bad credentials".to_string())))
                .times(1);
            fetcher.expect_fetch().never();

            fetcher
        };
        let crawler = crawler(fetcher, persister_with_count(), FailurePolicy::Skip);

        let summary = crawler.crawl(100).await.unwrap();

        assert!(matches!(summary.outcome, CrawlOutcome::Aborted { .. }));
        assert!(summary.failed_batches.is_empty());
        assert_eq!(0, summary.progress.cursor);
    }

    #[tokio::test]
    async fn crawler_reports_new_repositories() {
        let fetcher = {
            let mut fetcher = fetcher_with_quota();
            fetcher
                .expect_fetch()
                .returning(|batch| Ok(response_for(batch)));

            fetcher
        };
        let persister = {
            let mut persister = MockRepositoryPersister::new();
            persister.expect_count().returning(|| Ok(40)).times(1);
            persister.expect_count().returning(|| Ok(120)).times(1);
            persister
                .expect_upsert()
                .returning(|records| Ok(records.len() as u32));

            persister
        };
        let crawler = crawler(fetcher, persister, FailurePolicy::Skip);

        let summary = crawler.crawl(100).await.unwrap();

        assert_eq!(Some(80), summary.new_repositories);
    }

    #[tokio::test]
    async fn crawler_resumes_from_stored_cursor() {
        let fetcher = {
            let mut fetcher = fetcher_with_quota();
            fetcher
                .expect_fetch()
                .with(eq(Batch::new(200, 100)))
                .returning(|batch| Ok(response_for(batch)))
                .times(1);

            fetcher
        };
        let persister = {
            let mut persister = persister_with_count();
            persister
                .expect_upsert()
                .returning(|records| Ok(records.len() as u32))
                .times(1);

            persister
        };
        let progress_store = {
            let mut store = MockProgressStore::new();
            store.expect_load().returning(|| {
                let mut progress = CrawlProgress::start(300);
                progress.advance_past(&Batch::new(0, 100), true);
                progress.advance_past(&Batch::new(100, 100), true);

                Ok(Some(progress))
            });
            store
                .expect_save()
                .withf(|progress| progress.cursor == 300)
                .returning(|_| Ok(()));
            store.expect_save_summary().returning(|_| Ok(())).times(1);

            store
        };
        let crawler = BatchCrawler::new(
            Arc::new(fetcher),
            Arc::new(persister),
            Arc::new(progress_store),
            CrawlerConfig::dummy(),
            ShutdownSignal::shared(),
        );

        let summary = crawler.crawl(300).await.unwrap();

        assert_eq!(CrawlOutcome::Completed, summary.outcome);
        assert_eq!(300, summary.progress.cursor);
        assert_eq!(3, summary.progress.completed_batches);
        assert_eq!(100, summary.processed);
    }

    #[tokio::test]
    async fn crawler_interrupted_then_resumed_covers_every_offset_once() {
        let directory = tempfile::tempdir().unwrap();
        let progress_path = directory.path().join("progress.json");
        let shutdown = ShutdownSignal::shared();

        let first_run = {
            let fetcher = {
                let mut fetcher = fetcher_with_quota();
                for offset in [0, 100] {
                    fetcher
                        .expect_fetch()
                        .with(eq(Batch::new(offset, 100)))
                        .returning(|batch| Ok(response_for(batch)))
                        .times(1);
                }

                fetcher
            };
            let persister = {
                let mut persister = persister_with_count();
                persister
                    .expect_upsert()
                    .returning(|records| Ok(records.len() as u32))
                    .times(1);
                let shutdown = shutdown.clone();
                persister
                    .expect_upsert()
                    .returning(move |records| {
                        shutdown.request();
                        Ok(records.len() as u32)
                    })
                    .times(1);

                persister
            };

            BatchCrawler::new(
                Arc::new(fetcher),
                Arc::new(persister),
                Arc::new(JsonFileProgressStore::new(&progress_path, None)),
                CrawlerConfig::dummy(),
                shutdown.clone(),
            )
        };
        let summary = first_run.crawl(400).await.unwrap();
        assert_eq!(CrawlOutcome::Interrupted, summary.outcome);
        assert_eq!(200, summary.progress.cursor);

        let second_run = {
            let fetcher = {
                let mut fetcher = fetcher_with_quota();
                let mut sequence = Sequence::new();
                for offset in [200, 300] {
                    fetcher
                        .expect_fetch()
                        .with(eq(Batch::new(offset, 100)))
                        .times(1)
                        .in_sequence(&mut sequence)
                        .returning(|batch| Ok(response_for(batch)));
                }

                fetcher
            };
            let persister = {
                let mut persister = persister_with_count();
                persister
                    .expect_upsert()
                    .returning(|records| Ok(records.len() as u32))
                    .times(2);

                persister
            };

            BatchCrawler::new(
                Arc::new(fetcher),
                Arc::new(persister),
                Arc::new(JsonFileProgressStore::new(&progress_path, None)),
                CrawlerConfig::dummy(),
                ShutdownSignal::shared(),
            )
        };
        let summary = second_run.crawl(400).await.unwrap();

        assert_eq!(CrawlOutcome::Completed, summary.outcome);
        assert_eq!(400, summary.progress.cursor);
        assert_eq!(4, summary.progress.completed_batches);
    }

    struct StalledFetcher;

    #[async_trait::async_trait]
    impl RepositoryFetcher for StalledFetcher {
        async fn fetch(&self, _batch: &Batch) -> Result<FetchResponse, FetchError> {
            std::future::pending().await
        }

        async fn quota(&self) -> Result<QuotaSnapshot, FetchError> {
            Ok(QuotaSnapshot::dummy())
        }
    }

    #[tokio::test]
    async fn crawler_abandons_in_flight_batch_on_stop_request() {
        let shutdown = ShutdownSignal::shared();
        let progress_store = {
            let mut store = MockProgressStore::new();
            store.expect_load().returning(|| Ok(None));
            store
                .expect_save()
                .withf(|progress| progress.cursor == 0)
                .returning(|_| Ok(()))
                .times(1);
            store.expect_save_summary().returning(|_| Ok(())).times(1);

            store
        };
        let persister = {
            let mut persister = persister_with_count();
            persister.expect_upsert().never();

            persister
        };
        let crawler = Arc::new(BatchCrawler::new(
            Arc::new(StalledFetcher),
            Arc::new(persister),
            Arc::new(progress_store),
            CrawlerConfig::dummy(),
            shutdown.clone(),
        ));

        let crawl = tokio::spawn({
            let crawler = crawler.clone();
            async move { crawler.crawl(300).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.request();
        let summary = tokio::time::timeout(Duration::from_secs(5), crawl)
            .await
            .expect("Crawl should stop")
            .unwrap()
            .unwrap();

        assert_eq!(CrawlOutcome::Interrupted, summary.outcome);
        assert_eq!(0, summary.progress.cursor);
        assert_eq!(0, summary.processed);
    }

    #[tokio::test(start_paused = true)]
    async fn crawler_waits_for_quota_reset_reported_by_the_last_fetch() {
        let fetch_instants = Arc::new(std::sync::Mutex::new(vec![]));
        let fetcher = {
            let mut fetcher = fetcher_with_quota();
            let fetch_instants = fetch_instants.clone();
            fetcher
                .expect_fetch()
                .returning(move |batch| {
                    let mut fetch_instants = fetch_instants.lock().unwrap();
                    fetch_instants.push(tokio::time::Instant::now());
                    let quota = if fetch_instants.len() == 1 {
                        QuotaSnapshot::new(
                            5000,
                            1,
                            CrawlerConfig::dummy().safety_buffer,
                            Utc::now() + chrono::Duration::seconds(60),
                        )
                    } else {
                        QuotaSnapshot::dummy()
                    };

                    Ok(FetchResponse::new(response_for(batch).items().to_vec(), quota))
                })
                .times(2);

            fetcher
        };
        let persister = {
            let mut persister = persister_with_count();
            persister
                .expect_upsert()
                .returning(|records| Ok(records.len() as u32))
                .times(2);

            persister
        };
        let crawler = crawler(fetcher, persister, FailurePolicy::Skip);

        let summary = crawler.crawl(200).await.unwrap();

        assert!(summary.is_success());
        let fetch_instants = fetch_instants.lock().unwrap();
        assert!(fetch_instants[1].duration_since(fetch_instants[0]) >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn crawler_stops_during_quota_check_backoff() {
        let shutdown = ShutdownSignal::shared();
        let fetcher = {
            let mut fetcher = MockRepositoryFetcher::new();
            fetcher
                .expect_quota()
                .returning(|| Err(FetchError::Network("HTTP 502".to_string())));
            fetcher.expect_fetch().never();

            fetcher
        };
        let persister = {
            let mut persister = MockRepositoryPersister::new();
            persister.expect_upsert().never();

            persister
        };
        let crawler = Arc::new(BatchCrawler::new(
            Arc::new(fetcher),
            Arc::new(persister),
            Arc::new(empty_progress_store()),
            CrawlerConfig {
                base_delay: Duration::from_secs(10),
                max_delay: Duration::from_secs(60),
                ..CrawlerConfig::dummy()
            },
            shutdown.clone(),
        ));
        let start = tokio::time::Instant::now();

        let crawl = tokio::spawn({
            let crawler = crawler.clone();
            async move { crawler.crawl(300).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.request();
        let summary = crawl.await.unwrap().unwrap();

        assert_eq!(CrawlOutcome::Interrupted, summary.outcome);
        assert_eq!(0, summary.progress.cursor);
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}

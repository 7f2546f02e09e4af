//! Sync executor
//!
//! Drives one provider at a time through load, authenticate, plan, fetch,
//! merge and persist. The executor never branches on provider type: the
//! authenticator, fetcher and store of a [`ProviderJob`] carry all the
//! provider-specific behavior.

use super::job::{ChannelReport, ChannelStatus, ProviderReport, SyncReport};
use super::{ErrorKind, SyncError};
use crate::auth::{AccessToken, AuthError, Authenticator};
use crate::clock::SharedClock;
use crate::dataset::{Dataset, DatasetStore};
use crate::fetcher::probe::Prober;
use crate::fetcher::{ChannelFetcher, FetcherError, SourceBatch};
use crate::merge::{merge_batch, CollisionPolicy};
use crate::planner::{coalesce, FetchWindow, WindowPlanner};
use crate::shutdown::SharedShutdown;
use crate::{Channel, Provider};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Everything needed to sync one provider
pub struct ProviderJob {
    /// Login for the provider
    pub authenticator: Box<dyn Authenticator>,
    /// Channel fetcher for the provider
    pub fetcher: Box<dyn ChannelFetcher>,
    /// Dataset location for the provider
    pub store: DatasetStore,
}

impl ProviderJob {
    /// Provider served by this job
    pub fn provider(&self) -> Provider {
        self.store.provider()
    }
}

/// Run-wide settings
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Window planning rules
    pub planner: WindowPlanner,
    /// Collision policy for merges
    pub policy: CollisionPolicy,
    /// Configured earliest-available bound; probed when absent
    pub earliest: Option<i64>,
    /// Earliest-available probe
    pub prober: Prober,
}

/// Executes sync runs
pub struct SyncExecutor {
    options: SyncOptions,
    clock: SharedClock,
    shutdown: Option<SharedShutdown>,
}

impl SyncExecutor {
    /// Create an executor
    pub fn new(options: SyncOptions, clock: SharedClock) -> Self {
        Self {
            options,
            clock,
            shutdown: None,
        }
    }

    /// Attach a shared shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|s| s.is_shutdown_requested())
    }

    /// Sync every job in order
    ///
    /// A failing provider never prevents the next one from running.
    pub async fn run(&self, jobs: &[ProviderJob]) -> SyncReport {
        let started_at = self.clock.now();
        let mut providers = Vec::with_capacity(jobs.len());

        for job in jobs {
            providers.push(self.sync_provider(job).await);
        }

        let report = SyncReport {
            started_at,
            finished_at: self.clock.now(),
            interrupted: self.shutdown_requested(),
            providers,
        };
        info!(
            providers = report.providers.len(),
            failures = report.has_failures(),
            interrupted = report.interrupted,
            "Sync run finished"
        );
        report
    }

    /// Sync one provider
    pub async fn sync_provider(&self, job: &ProviderJob) -> ProviderReport {
        let span = info_span!("sync_provider", provider = %job.provider());
        self.sync_provider_inner(job).instrument(span).await
    }

    async fn sync_provider_inner(&self, job: &ProviderJob) -> ProviderReport {
        let provider = job.provider();
        let mut report = ProviderReport::new(provider);
        let skip_all = |report: &mut ProviderReport| {
            report.channels = provider
                .channels()
                .iter()
                .map(|c| ChannelReport::skipped(*c))
                .collect();
        };

        if self.shutdown_requested() {
            skip_all(&mut report);
            report.fail(&SyncError::Cancelled);
            return report;
        }

        let existing = match job.store.read() {
            Ok(existing) => existing,
            Err(e) => {
                let e = SyncError::from(e);
                error!(error = %e, "Existing dataset unusable, aborting provider without writing");
                skip_all(&mut report);
                report.fail(&e);
                return report;
            }
        };

        let mut token = match job.authenticator.authenticate().await {
            Ok(token) => token,
            Err(e) => {
                let e = SyncError::from(e);
                error!(error = %e, kind = %e.kind(), "Authentication failed");
                skip_all(&mut report);
                report.fail(&e);
                return report;
            }
        };

        let now_ms = self.clock.now_millis();
        let mut working = existing.clone().unwrap_or_default();

        for (index, channel) in provider.channels().iter().enumerate() {
            if self.shutdown_requested() {
                warn!(channel = %channel, "Shutdown requested, not starting channel");
                report
                    .channels
                    .extend(provider.channels()[index..].iter().map(|c| ChannelReport::skipped(*c)));
                break;
            }

            let span = info_span!("sync_channel", channel = %channel);
            let outcome = self
                .sync_channel(job, &mut token, existing.as_ref(), &mut working, *channel, now_ms)
                .instrument(span)
                .await;

            match outcome {
                Ok(channel_report) => report.channels.push(channel_report),
                Err((mut channel_report, e)) => {
                    channel_report.fail(&e);
                    report.channels.push(channel_report);

                    if e.kind() == ErrorKind::Auth {
                        error!(channel = %channel, error = %e, "Provider refused re-authenticated requests, skipping remaining channels");
                        report.channels.extend(
                            provider.channels()[index + 1..]
                                .iter()
                                .map(|c| ChannelReport::skipped(*c)),
                        );
                        report.fail(&e);
                        // Channels merged so far are still persisted below
                        break;
                    }
                    warn!(channel = %channel, error = %e, kind = %e.kind(), "Channel failed, continuing");
                }
            }
        }

        if working == existing.unwrap_or_default() {
            info!("No changes, dataset left as is");
            return report;
        }

        match job.store.write(&working, self.clock.now()) {
            Ok(receipt) => {
                report.current = Some(receipt.current);
                report.backup = Some(receipt.backup);
            }
            Err(e) => {
                let e = SyncError::from(e);
                error!(error = %e, "Failed to persist dataset");
                report.fail(&e);
            }
        }
        report
    }

    async fn sync_channel(
        &self,
        job: &ProviderJob,
        token: &mut AccessToken,
        existing: Option<&Dataset>,
        working: &mut Dataset,
        channel: Channel,
        now_ms: i64,
    ) -> Result<ChannelReport, (ChannelReport, SyncError)> {
        let planner = &self.options.planner;

        let mut earliest = self.options.earliest;
        if earliest.is_none() && planner.needs_earliest(existing, channel) {
            match self.probe_earliest(job, token, channel, now_ms).await {
                Ok(bound) => earliest = Some(bound),
                Err(e) => return Err((ChannelReport::skipped(channel), e)),
            }
        }

        let windows = planner.plan_channel(existing, channel, now_ms, earliest);
        let Some(window) = coalesce(&windows) else {
            return Ok(ChannelReport::skipped(channel));
        };
        let mut report = ChannelReport::planned(&window);
        info!(
            mode = %window.mode,
            start = window.start_time,
            end = window.end_time,
            "Fetching channel"
        );

        let batches = match self.fetch_authorized(job, token, &window).await {
            Ok(batches) => batches,
            Err(e) => return Err((report, e)),
        };

        report.sources = batches.len();
        report.fetched = batches.iter().map(|b| b.readings.len()).sum();
        for batch in batches {
            let source = batch.source_id.clone();
            let stats = merge_batch(working, channel, batch, self.options.policy);
            debug!(source = %source, added = stats.added, updated = stats.updated, "Merged source");
            report.stats += stats;
        }

        report.status = if report.stats.changed() {
            ChannelStatus::Updated
        } else {
            ChannelStatus::Unchanged
        };
        info!(
            sources = report.sources,
            fetched = report.fetched,
            added = report.stats.added,
            updated = report.stats.updated,
            "Channel synced"
        );
        Ok(report)
    }

    /// Fetch `window`, re-authenticating once if the token is refused
    async fn fetch_authorized(
        &self,
        job: &ProviderJob,
        token: &mut AccessToken,
        window: &FetchWindow,
    ) -> Result<Vec<SourceBatch>, SyncError> {
        match job.fetcher.fetch(token, window).await {
            Err(FetcherError::Unauthorized(status)) => {
                self.reauthenticate(job, token, status).await?;
                match job.fetcher.fetch(token, window).await {
                    Err(FetcherError::Unauthorized(status)) => Err(AuthError::Refused {
                        provider: job.provider(),
                        status,
                    }
                    .into()),
                    other => Ok(other?),
                }
            }
            other => Ok(other?),
        }
    }

    async fn probe_earliest(
        &self,
        job: &ProviderJob,
        token: &mut AccessToken,
        channel: Channel,
        now_ms: i64,
    ) -> Result<i64, SyncError> {
        let prober = &self.options.prober;
        match prober.probe(job.fetcher.as_ref(), token, channel, now_ms).await {
            Err(FetcherError::Unauthorized(status)) => {
                self.reauthenticate(job, token, status).await?;
                match prober.probe(job.fetcher.as_ref(), token, channel, now_ms).await {
                    Err(FetcherError::Unauthorized(status)) => Err(AuthError::Refused {
                        provider: job.provider(),
                        status,
                    }
                    .into()),
                    other => Ok(other?),
                }
            }
            other => Ok(other?),
        }
    }

    async fn reauthenticate(
        &self,
        job: &ProviderJob,
        token: &mut AccessToken,
        status: u16,
    ) -> Result<(), SyncError> {
        warn!(status, "Token refused, re-authenticating once");
        job.authenticator.invalidate().await?;
        *token = job.authenticator.authenticate().await?;
        Ok(())
    }
}

//! End-to-end sync runs over in-memory providers
//!
//! Real token cache, planner, merge engine and dataset store; only the network
//! side (login exchange and channel fetcher) is faked.

use async_trait::async_trait;
use chrono::Duration;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use utility_sync::auth::token::{IssuedToken, LoginExchange, TokenAuth};
use utility_sync::auth::{AccessToken, AuthError, Authenticator, TokenCache};
use utility_sync::clock::{Clock, FixedClock};
use utility_sync::credentials::Credential;
use utility_sync::dataset::DatasetStore;
use utility_sync::fetcher::probe::Prober;
use utility_sync::fetcher::{ChannelFetcher, FetcherError, FetcherResult, SourceBatch};
use utility_sync::merge::CollisionPolicy;
use utility_sync::planner::{AnalysisPeriod, FetchWindow, WindowMode, WindowPlanner};
use utility_sync::shutdown::{ShutdownCoordinator, SharedShutdown};
use utility_sync::sync::{ChannelStatus, ErrorKind, ProviderJob, SyncExecutor, SyncOptions};
use utility_sync::{Channel, Provider, Reading};

const NOW: i64 = 1735344000000;
const HOUR: i64 = 3_600_000;
const DAY: i64 = 24 * HOUR;

struct CountingExchange {
    calls: AtomicUsize,
    clock: Arc<FixedClock>,
}

#[async_trait]
impl LoginExchange for CountingExchange {
    async fn login(&self, _credential: &Credential) -> Result<IssuedToken, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IssuedToken {
            token: format!("token-{n}"),
            expires_at: Some(self.clock.now() + Duration::hours(12)),
        })
    }
}

struct FailingAuth;

#[async_trait]
impl Authenticator for FailingAuth {
    fn provider(&self) -> Provider {
        Provider::Ecobee
    }

    async fn authenticate(&self) -> Result<AccessToken, AuthError> {
        Err(AuthError::MfaRejected { attempts: 2 })
    }

    async fn invalidate(&self) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Electric meter with hourly readings; other channels report no sources
#[derive(Default)]
struct MeterFetcher {
    values: Mutex<BTreeMap<i64, f64>>,
    windows: Mutex<Vec<FetchWindow>>,
    refused_tokens: Vec<&'static str>,
    /// Channels refused whatever the token
    refused_channels: Vec<Channel>,
    shutdown_after_fetch: Option<SharedShutdown>,
}

impl MeterFetcher {
    fn with_history(from: i64, to: i64) -> Self {
        let fetcher = Self::default();
        {
            let mut values = fetcher.values.lock().unwrap();
            let mut t = from;
            while t <= to {
                values.insert(t, 1.0);
                t += HOUR;
            }
        }
        fetcher
    }

    fn electric_windows(&self) -> Vec<FetchWindow> {
        self.windows
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.channel == Channel::Electric)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ChannelFetcher for MeterFetcher {
    fn provider(&self) -> Provider {
        Provider::Hsv
    }

    async fn fetch(&self, token: &AccessToken, window: &FetchWindow) -> FetcherResult<Vec<SourceBatch>> {
        if self.refused_tokens.contains(&token.value.as_str()) {
            return Err(FetcherError::Unauthorized(401));
        }
        if self.refused_channels.contains(&window.channel) {
            return Err(FetcherError::Unauthorized(403));
        }
        self.windows.lock().unwrap().push(window.clone());
        if let Some(shutdown) = &self.shutdown_after_fetch {
            shutdown.request_shutdown();
        }
        if window.channel != Channel::Electric {
            return Ok(Vec::new());
        }

        let mut batch = SourceBatch::new("E-100");
        batch.readings = self
            .values
            .lock()
            .unwrap()
            .range(window.start_time..=window.end_time)
            .map(|(t, v)| Reading::single(*t, "usage", *v).unwrap())
            .collect();
        Ok(vec![batch])
    }
}

/// Forwards to a shared fetcher so tests can keep inspecting it
struct SharedFetcher(Arc<MeterFetcher>);

#[async_trait]
impl ChannelFetcher for SharedFetcher {
    fn provider(&self) -> Provider {
        self.0.provider()
    }

    async fn fetch(&self, token: &AccessToken, window: &FetchWindow) -> FetcherResult<Vec<SourceBatch>> {
        self.0.fetch(token, window).await
    }
}

struct Harness {
    dir: TempDir,
    clock: Arc<FixedClock>,
    exchange: Arc<CountingExchange>,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(FixedClock::at_millis(NOW));
        Self {
            dir: TempDir::new().unwrap(),
            exchange: Arc::new(CountingExchange {
                calls: AtomicUsize::new(0),
                clock: clock.clone(),
            }),
            clock,
        }
    }

    fn hsv_job(&self, fetcher: Arc<MeterFetcher>) -> ProviderJob {
        ProviderJob {
            authenticator: Box::new(TokenAuth::new(
                Credential::new(Provider::Hsv, "meter@example.com", "hunter2", None),
                self.exchange.clone(),
                TokenCache::new(self.dir.path().join("tokens")),
                self.clock.clone(),
            )),
            fetcher: Box::new(SharedFetcher(fetcher)),
            store: self.store(Provider::Hsv),
        }
    }

    fn store(&self, provider: Provider) -> DatasetStore {
        DatasetStore::new(self.dir.path().join("data"), provider)
    }

    fn executor(&self, period_days: u32) -> SyncExecutor {
        let options = SyncOptions {
            planner: WindowPlanner::new(AnalysisPeriod::Days(period_days), Duration::hours(24)),
            policy: CollisionPolicy::IncomingWins,
            earliest: None,
            prober: Prober::default(),
        };
        SyncExecutor::new(options, self.clock.clone())
    }
}

#[tokio::test]
async fn incremental_runs_pick_up_corrections_and_new_readings() {
    let harness = Harness::new();
    let fetcher = Arc::new(MeterFetcher::with_history(NOW - 10 * DAY, NOW));
    let job = harness.hsv_job(fetcher.clone());

    // First run: full two-day collection
    let report = harness.executor(2).run(std::slice::from_ref(&job)).await;
    assert_eq!(report.exit_code(), 0);
    let electric = &report.providers[0].channels[0];
    assert_eq!(electric.status, ChannelStatus::Updated);
    assert_eq!(electric.mode, Some(WindowMode::Full));
    assert_eq!(electric.stats.added, 49);
    assert!(report.providers[0].backup.as_ref().unwrap().exists());

    // Provider revises the last stored hour and publishes two more
    {
        let mut values = fetcher.values.lock().unwrap();
        values.insert(NOW - HOUR, 1.5);
        values.insert(NOW + HOUR, 2.0);
        values.insert(NOW + 2 * HOUR, 2.0);
    }
    harness.clock.advance(Duration::hours(2));

    let report = harness.executor(2).run(std::slice::from_ref(&job)).await;
    assert_eq!(report.exit_code(), 0);
    let electric = &report.providers[0].channels[0];
    assert_eq!(electric.mode, Some(WindowMode::Incremental));
    assert_eq!(electric.stats.added, 2);
    assert_eq!(electric.stats.updated, 1);

    let window = fetcher.electric_windows().pop().unwrap();
    assert!(window.start_time <= NOW - 24 * HOUR);
    assert_eq!(window.end_time, NOW + 2 * HOUR);

    let dataset = harness.store(Provider::Hsv).read().unwrap().unwrap();
    let series = dataset.find(Channel::Electric, "E-100").unwrap();
    assert_eq!(series.total_readings, 51);
    assert_eq!(series.readings.len(), 51);
    let corrected = series
        .readings
        .iter()
        .find(|r| r.timestamp == NOW - HOUR)
        .unwrap();
    assert_eq!(corrected.value("usage"), Some(&serde_json::json!(1.5)));
    assert!(series.readings.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

    // Nothing new: no write, one login for all three runs
    let before = std::fs::read(harness.store(Provider::Hsv).paths().current()).unwrap();
    let report = harness.executor(2).run(std::slice::from_ref(&job)).await;
    assert!(report.providers[0].current.is_none());
    assert_eq!(report.providers[0].channels[0].status, ChannelStatus::Unchanged);
    let after = std::fs::read(harness.store(Provider::Hsv).paths().current()).unwrap();
    assert_eq!(before, after);
    assert_eq!(harness.exchange.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn revoked_token_is_replaced_once_and_cached() {
    let harness = Harness::new();
    let fetcher = Arc::new(MeterFetcher {
        refused_tokens: vec!["token-1"],
        ..MeterFetcher::with_history(NOW - DAY, NOW)
    });
    let job = harness.hsv_job(fetcher.clone());

    let report = harness.executor(1).run(std::slice::from_ref(&job)).await;
    assert!(!report.has_failures());
    assert_eq!(harness.exchange.calls.load(Ordering::SeqCst), 2);

    let cached = TokenCache::new(harness.dir.path().join("tokens"))
        .load(utility_sync::auth::cache::HSV_TOKEN_KEY)
        .unwrap();
    assert_eq!(cached.token, "token-2");

    // Next run reuses the replacement without logging in
    harness.executor(1).run(std::slice::from_ref(&job)).await;
    assert_eq!(harness.exchange.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn refusal_on_a_later_channel_keeps_earlier_channels() {
    let harness = Harness::new();
    let fetcher = Arc::new(MeterFetcher {
        refused_channels: vec![Channel::Gas],
        ..MeterFetcher::with_history(NOW - DAY, NOW)
    });
    let job = harness.hsv_job(fetcher.clone());

    let report = harness.executor(1).run(std::slice::from_ref(&job)).await;
    let provider = &report.providers[0];
    assert_eq!(provider.error_kind, Some(ErrorKind::Auth));
    let statuses: Vec<_> = provider.channels.iter().map(|c| c.status).collect();
    assert_eq!(
        statuses,
        vec![ChannelStatus::Updated, ChannelStatus::Failed, ChannelStatus::Skipped]
    );
    assert_eq!(report.exit_code(), 2);

    // One fresh login for the refusal, none after the second refusal
    assert_eq!(harness.exchange.calls.load(Ordering::SeqCst), 2);

    assert!(provider.current.is_some());
    let dataset = harness.store(Provider::Hsv).read().unwrap().unwrap();
    assert_eq!(dataset.find(Channel::Electric, "E-100").unwrap().total_readings, 25);
}

#[tokio::test]
async fn failing_provider_does_not_block_the_next() {
    let harness = Harness::new();
    let fetcher = Arc::new(MeterFetcher::with_history(NOW - DAY, NOW));
    let jobs = vec![
        ProviderJob {
            authenticator: Box::new(FailingAuth),
            fetcher: Box::new(SharedFetcher(fetcher.clone())),
            store: harness.store(Provider::Ecobee),
        },
        harness.hsv_job(fetcher.clone()),
    ];

    let report = harness.executor(1).run(&jobs).await;
    assert_eq!(report.providers[0].error_kind, Some(ErrorKind::Auth));
    assert!(report.providers[0]
        .channels
        .iter()
        .all(|c| c.status == ChannelStatus::Skipped));
    assert!(!harness.store(Provider::Ecobee).paths().current().exists());

    assert!(report.providers[1].current.is_some());
    assert_eq!(report.exit_code(), 2);
}

#[tokio::test]
async fn shutdown_mid_run_persists_what_was_merged() {
    let harness = Harness::new();
    let shutdown = ShutdownCoordinator::shared();
    let fetcher = Arc::new(MeterFetcher {
        shutdown_after_fetch: Some(shutdown.clone()),
        ..MeterFetcher::with_history(NOW - DAY, NOW)
    });
    let job = harness.hsv_job(fetcher.clone());

    let report = harness
        .executor(1)
        .with_shutdown(shutdown)
        .run(std::slice::from_ref(&job))
        .await;

    assert!(report.interrupted);
    assert_eq!(report.exit_code(), 130);
    let statuses: Vec<_> = report.providers[0].channels.iter().map(|c| c.status).collect();
    assert_eq!(
        statuses,
        vec![ChannelStatus::Updated, ChannelStatus::Skipped, ChannelStatus::Skipped]
    );

    let dataset = harness.store(Provider::Hsv).read().unwrap().unwrap();
    assert_eq!(dataset.find(Channel::Electric, "E-100").unwrap().total_readings, 25);
    assert!(dataset.series(Channel::Gas).is_empty());
}

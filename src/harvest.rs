use chrono::Utc;
use futures::FutureExt;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep, sleep_until, timeout_at};
use uuid::Uuid;

use crate::extractor::{Record, extract_records};
use crate::fetcher::{FetchError, PageFetcher, fetch_site};
use crate::sites::SiteDescriptor;

#[derive(Debug, Clone)]
pub struct HarvestSettings {
    /// Sites fetched concurrently per wave
    pub wave_size: usize,
    /// Pause between two waves
    pub wave_pause: Duration,
    /// Optional budget for the whole run; sites still in flight when it elapses fail
    pub deadline: Option<Duration>,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            wave_size: 3,
            wave_pause: Duration::from_secs(2),
            deadline: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("wave size must be at least 1")]
    InvalidWaveSize,
}

/// Lifecycle of one site within a run. There is no way back: each run
/// visits every state at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteState {
    Pending,
    Fetching,
    Fetched,
    FetchFailed,
    Extracted,
    ExtractionFailed,
    Done,
}

impl SiteState {
    pub fn can_transition_to(self, next: SiteState) -> bool {
        use SiteState::*;
        matches!(
            (self, next),
            (Pending, Fetching)
                | (Fetching, Fetched)
                | (Fetching, FetchFailed)
                | (Fetched, Extracted)
                | (Fetched, ExtractionFailed)
                | (FetchFailed, Done)
                | (Extracted, Done)
                | (ExtractionFailed, Done)
        )
    }
}

/// What happened to one site during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteReport {
    pub source: String,
    /// Last state reached before `done`
    pub outcome: SiteState,
    pub records: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SiteReport {
    pub fn is_success(&self) -> bool {
        self.outcome == SiteState::Extracted
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestOutcome {
    pub run_id: Uuid,
    pub harvested_at: String,
    pub count: usize,
    /// Waves actually started; waves skipped after the deadline are not counted
    pub waves: usize,
    pub records: Vec<Record>,
    pub sites: Vec<SiteReport>,
}

struct SiteRun<'a> {
    site: &'a SiteDescriptor,
    state: SiteState,
}

impl<'a> SiteRun<'a> {
    fn new(site: &'a SiteDescriptor) -> Self {
        Self {
            site,
            state: SiteState::Pending,
        }
    }

    fn transition(&mut self, next: SiteState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );
        log::trace!("{}: {:?} -> {:?}", self.site.name, self.state, next);
        self.state = next;
    }

    fn finish(mut self, records: Vec<Record>, error: Option<String>) -> (SiteReport, Vec<Record>) {
        let outcome = self.state;
        self.transition(SiteState::Done);
        let report = SiteReport {
            source: self.site.name.clone(),
            outcome,
            records: records.len(),
            error,
        };
        (report, records)
    }
}

/// Runs every site through fetch and extraction in fixed-size waves
pub struct Harvester {
    fetcher: Arc<dyn PageFetcher>,
    settings: HarvestSettings,
}

impl Harvester {
    pub fn new(fetcher: Arc<dyn PageFetcher>, settings: HarvestSettings) -> Self {
        Self { fetcher, settings }
    }

    pub async fn harvest(&self, sites: &[SiteDescriptor]) -> Result<HarvestOutcome, HarvestError> {
        if self.settings.wave_size == 0 {
            return Err(HarvestError::InvalidWaveSize);
        }

        let run_id = Uuid::new_v4();
        let harvested_at = Utc::now().to_rfc3339();
        // a budget too large to represent is no budget at all
        let deadline = self
            .settings
            .deadline
            .and_then(|budget| Instant::now().checked_add(budget));
        let waves: Vec<&[SiteDescriptor]> = sites.chunks(self.settings.wave_size).collect();

        log::info!(
            "🔍 Starting harvest {}: {} sites in {} wave(s) of up to {}",
            run_id,
            sites.len(),
            waves.len(),
            self.settings.wave_size
        );

        let mut reports = Vec::with_capacity(sites.len());
        let mut all_records = Vec::new();
        let mut executed_waves = 0;

        for (index, wave) in waves.iter().enumerate() {
            if index > 0 {
                self.pause_between_waves(deadline).await;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                for site in wave.iter() {
                    reports.push(deadline_report(site).0);
                }
                continue;
            }
            executed_waves += 1;
            log::debug!("Wave {}/{}: {} site(s)", index + 1, waves.len(), wave.len());

            let results = join_all(wave.iter().map(|site| self.run_site(site, deadline))).await;
            for (report, records) in results {
                reports.push(report);
                all_records.extend(records);
            }
        }

        let records = dedup_by_link(all_records);
        let failed = reports.iter().filter(|r| !r.is_success()).count();

        log::info!(
            "✅ Harvest {} completed: {} unique articles, {} of {} site(s) failed",
            run_id,
            records.len(),
            failed,
            reports.len()
        );

        Ok(HarvestOutcome {
            run_id,
            harvested_at,
            count: records.len(),
            waves: executed_waves,
            records,
            sites: reports,
        })
    }

    /// The configured pause, cut short by the deadline
    async fn pause_between_waves(&self, deadline: Option<Instant>) {
        let pause = self.settings.wave_pause;
        match deadline {
            Some(deadline) => {
                let resume = Instant::now().checked_add(pause).unwrap_or(deadline);
                sleep_until(resume.min(deadline)).await;
            }
            None => sleep(pause).await,
        }
    }

    /// One site, isolated: failures, panics and the deadline all end up in its report
    async fn run_site(
        &self,
        site: &SiteDescriptor,
        deadline: Option<Instant>,
    ) -> (SiteReport, Vec<Record>) {
        let guarded = AssertUnwindSafe(self.harvest_site(site)).catch_unwind();

        let result = match deadline {
            Some(deadline) => match timeout_at(deadline, guarded).await {
                Ok(result) => result,
                Err(_) => return deadline_report(site),
            },
            None => guarded.await,
        };

        result.unwrap_or_else(|panic| {
            let message = format!("site pipeline panicked: {}", panic_message(panic.as_ref()));
            log::error!("❌ Error scraping {}: {}", site.name, message);
            failed_report(site, SiteState::ExtractionFailed, message)
        })
    }

    async fn harvest_site(&self, site: &SiteDescriptor) -> (SiteReport, Vec<Record>) {
        let mut run = SiteRun::new(site);

        run.transition(SiteState::Fetching);
        let fetched = fetch_site(self.fetcher.as_ref(), site).await;

        let body = match fetched.body {
            Ok(body) => {
                run.transition(SiteState::Fetched);
                body
            }
            Err(e) => {
                log::error!("❌ Error scraping {}: {}", site.name, e);
                run.transition(SiteState::FetchFailed);
                return run.finish(Vec::new(), Some(e.to_string()));
            }
        };

        match extract_records(&body, site) {
            Ok(records) => {
                log::info!("✅ Successfully scraped {} articles from {}", records.len(), site.name);
                run.transition(SiteState::Extracted);
                run.finish(records, None)
            }
            Err(e) => {
                log::error!("❌ Error parsing {}: {}", site.name, e);
                run.transition(SiteState::ExtractionFailed);
                run.finish(Vec::new(), Some(e.to_string()))
            }
        }
    }
}

fn failed_report(site: &SiteDescriptor, outcome: SiteState, error: String) -> (SiteReport, Vec<Record>) {
    let report = SiteReport {
        source: site.name.clone(),
        outcome,
        records: 0,
        error: Some(error),
    };
    (report, Vec::new())
}

fn deadline_report(site: &SiteDescriptor) -> (SiteReport, Vec<Record>) {
    log::error!("❌ Error scraping {}: {}", site.name, FetchError::DeadlineExceeded);
    failed_report(site, SiteState::FetchFailed, FetchError::DeadlineExceeded.to_string())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Keep the first record seen for every link, preserving order
pub fn dedup_by_link(records: Vec<Record>) -> Vec<Record> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(record.link.clone()))
        .collect()
}

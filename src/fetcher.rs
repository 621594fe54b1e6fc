//! Consolidates a fixed list of sheets into one [`Dataset`].
//!
//! Every source is fetched in order with retry and exponential backoff. A
//! source that keeps failing is logged and skipped, so a fetch cycle never
//! fails as a whole: the worst outcome is an empty dataset.

use crate::dataset::{Dataset, Record, tag_provenance};
use crate::error::SourceError;
use crate::source::{SheetContents, SheetSource, SourceDescriptor};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Backoff after failed attempt `n` is `unit * base^n`.
    pub backoff_base: u32,
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 2,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(self.backoff_base.saturating_pow(attempt))
    }
}

#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Upper bound on the consolidated record count.
    pub max_rows: usize,
    pub retry: RetryPolicy,
    /// Pause between two successive sources, independent of retry backoff.
    pub source_delay: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_rows: 5000,
            retry: RetryPolicy::default(),
            source_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSource {
    pub source: SourceDescriptor,
    pub title: String,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Empty,
    Failed(SourceError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSource {
    pub source: SourceDescriptor,
    pub reason: SkipReason,
}

/// Side channel describing one fetch cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchReport {
    pub loaded: Vec<LoadedSource>,
    pub skipped: Vec<SkippedSource>,
    /// The row cap cut a batch short or stopped the cycle early.
    pub truncated: bool,
}

impl FetchReport {
    pub fn failures(&self) -> usize {
        self.skipped
            .iter()
            .filter(|s| matches!(s.reason, SkipReason::Failed(_)))
            .count()
    }
}

pub struct SourceFetcher {
    source: Arc<dyn SheetSource>,
    descriptors: Vec<SourceDescriptor>,
    policy: FetchPolicy,
}

impl SourceFetcher {
    pub fn new(
        source: Arc<dyn SheetSource>,
        descriptors: Vec<SourceDescriptor>,
        policy: FetchPolicy,
    ) -> Self {
        Self {
            source,
            descriptors,
            policy,
        }
    }

    pub fn descriptors(&self) -> &[SourceDescriptor] {
        &self.descriptors
    }

    /// Run one fetch cycle over every configured source.
    ///
    /// Records keep their per-source order and sources keep the configured
    /// order. Once `max_rows` records are collected no further sources are
    /// requested.
    pub async fn fetch(&self) -> (Dataset, FetchReport) {
        let mut records: Vec<Record> = Vec::new();
        let mut report = FetchReport::default();

        for (index, descriptor) in self.descriptors.iter().enumerate() {
            if records.len() >= self.policy.max_rows {
                log::info!(
                    "row cap of {} reached, not fetching remaining {} source(s)",
                    self.policy.max_rows,
                    self.descriptors.len() - index
                );
                report.truncated = true;
                break;
            }
            if index > 0 && !self.policy.source_delay.is_zero() {
                tokio::time::sleep(self.policy.source_delay).await;
            }

            let sheet = match self.fetch_with_retry(descriptor).await {
                Ok(sheet) => sheet,
                Err(err) => {
                    log::warn!("skipping sheet {}: {}", descriptor, err);
                    report.skipped.push(SkippedSource {
                        source: descriptor.clone(),
                        reason: SkipReason::Failed(err),
                    });
                    continue;
                }
            };

            let SheetContents {
                title,
                records: mut batch,
            } = sheet;
            if batch.is_empty() {
                log::info!("sheet {} ({}) has no rows, skipping", title, descriptor);
                report.skipped.push(SkippedSource {
                    source: descriptor.clone(),
                    reason: SkipReason::Empty,
                });
                continue;
            }

            let room = self.policy.max_rows - records.len();
            if batch.len() > room {
                log::info!(
                    "truncating sheet {} from {} to {} rows to respect the row cap",
                    title,
                    batch.len(),
                    room
                );
                batch.truncate(room);
                report.truncated = true;
            }

            tag_provenance(&mut batch, &title);
            log::info!("loaded {} ({} rows)", title, batch.len());
            report.loaded.push(LoadedSource {
                source: descriptor.clone(),
                title,
                rows: batch.len(),
            });
            records.extend(batch);
        }

        if records.is_empty() {
            log::warn!(
                "no sheet loaded successfully ({} source(s), {} failed)",
                self.descriptors.len(),
                report.failures()
            );
        } else {
            log::info!(
                "fetched {} rows from {} sheet(s), {} skipped",
                records.len(),
                report.loaded.len(),
                report.skipped.len()
            );
        }

        (Dataset::new(records), report)
    }

    async fn fetch_with_retry(
        &self,
        descriptor: &SourceDescriptor,
    ) -> Result<SheetContents, SourceError> {
        let retry = &self.policy.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.source.fetch(descriptor).await {
                Ok(sheet) => return Ok(sheet),
                Err(err) if err.is_permanent() => return Err(err),
                Err(err) => {
                    if attempt >= retry.max_attempts {
                        return Err(err);
                    }
                    let wait = retry.backoff(attempt);
                    if err.is_rate_limit() {
                        log::warn!(
                            "sheet {} rate limited, backing off {:?} (attempt {}/{})",
                            descriptor,
                            wait,
                            attempt,
                            retry.max_attempts
                        );
                    } else {
                        log::warn!(
                            "sheet {} attempt {}/{} failed: {}, retrying in {:?}",
                            descriptor,
                            attempt,
                            retry.max_attempts,
                            err,
                            wait
                        );
                    }
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

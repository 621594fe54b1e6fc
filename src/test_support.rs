//! Scripted collaborators shared by the unit tests.

use crate::cache::Clock;
use crate::dataset::{CellValue, Record};
use crate::error::SourceError;
use crate::source::{SheetContents, SheetSource, SourceDescriptor};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// A sheet named `title` with `rows` records: `row` = index, `value` = "title-index".
pub fn sheet(title: &str, rows: usize) -> SheetContents {
    SheetContents {
        title: title.to_string(),
        records: (0..rows)
            .map(|i| {
                Record::new()
                    .with("row", CellValue::Number(i as f64))
                    .with("value", CellValue::Text(format!("{title}-{i}")))
            })
            .collect(),
    }
}

#[derive(Default)]
struct Script {
    queue: VecDeque<Result<SheetContents, SourceError>>,
    fallback: Option<Result<SheetContents, SourceError>>,
}

/// Per-descriptor queue of canned results.
///
/// Queued results are consumed first; afterwards the `*_always` result is
/// repeated. Unscripted descriptors fail with `NotFound`.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<HashMap<String, usize>>,
    latency: Mutex<Duration>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self, id: &str, f: impl FnOnce(&mut Script)) {
        let mut scripts = self.scripts.lock().unwrap();
        f(scripts.entry(id.to_string()).or_default());
    }

    pub fn succeed(&self, id: &str, sheet: SheetContents) {
        self.script(id, |s| s.queue.push_back(Ok(sheet)));
    }

    pub fn fail(&self, id: &str, err: SourceError) {
        self.script(id, |s| s.queue.push_back(Err(err)));
    }

    pub fn succeed_always(&self, id: &str, sheet: SheetContents) {
        self.script(id, |s| s.fallback = Some(Ok(sheet)));
    }

    pub fn fail_always(&self, id: &str, err: SourceError) {
        self.script(id, |s| s.fallback = Some(Err(err)));
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn calls(&self, id: &str) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl SheetSource for ScriptedSource {
    async fn fetch(&self, source: &SourceDescriptor) -> Result<SheetContents, SourceError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(source.as_str().to_string())
            .or_default() += 1;

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(source.as_str()) {
            Some(script) => match script.queue.pop_front() {
                Some(result) => result,
                None => script
                    .fallback
                    .clone()
                    .unwrap_or_else(|| Err(SourceError::NotFound(source.to_string()))),
            },
            None => Err(SourceError::NotFound(source.to_string())),
        }
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

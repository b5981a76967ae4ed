use serde_json::{Value, json};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// JSON-lines journal of pipeline stage timings, shared by all requests.
#[derive(Clone)]
pub struct PerfJournal {
    inner: Arc<Mutex<JournalState>>,
    next_request: Arc<AtomicU64>,
}

struct JournalState {
    writer: BufWriter<File>,
    path: PathBuf,
    span_totals: HashMap<String, f64>,
    span_counts: HashMap<String, u64>,
}

impl std::fmt::Debug for PerfJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerfJournal").finish_non_exhaustive()
    }
}

impl PerfJournal {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(JournalState {
                writer: BufWriter::new(file),
                path,
                span_totals: HashMap::new(),
                span_counts: HashMap::new(),
            })),
            next_request: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn next_request_id(&self) -> u64 {
        self.next_request.fetch_add(1, Ordering::Relaxed)
    }

    pub fn log_span_ms(&self, name: &str, request: u64, ms: f64) {
        let json = json!({
            "type": "perf.span",
            "name": name,
            "request": request,
            "unit": "ms",
            "ms": round_ms(ms),
        });
        if let Ok(mut state) = self.inner.lock() {
            *state.span_totals.entry(name.to_string()).or_insert(0.0) += ms;
            let entry = state.span_counts.entry(name.to_string()).or_insert(0);
            *entry = entry.saturating_add(1);
            let _ = writeln!(state.writer, "{json}");
        }
    }

    pub fn log_counts(&self, name: &str, request: u64, counts: &[(&str, u64)]) {
        let counts: serde_json::Map<String, Value> = counts
            .iter()
            .map(|(key, value)| (key.to_string(), Value::from(*value)))
            .collect();
        let out = json!({
            "type": "perf.counts",
            "name": name,
            "request": request,
            "counts": counts,
        });
        if let Ok(mut state) = self.inner.lock() {
            let _ = writeln!(state.writer, "{out}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

impl Drop for JournalState {
    fn drop(&mut self) {
        let _ = self.writer.flush();
        let Ok(file) = File::create(summary_path_for(&self.path)) else {
            return;
        };
        let mut writer = BufWriter::new(file);
        let mut spans: Vec<(&String, &f64)> = self.span_totals.iter().collect();
        spans.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
        for (rank, (name, ms)) in spans.into_iter().enumerate() {
            let count = self.span_counts.get(name).copied().unwrap_or(1).max(1);
            let line = json!({
                "type": "perf.total",
                "rank": rank + 1,
                "name": name,
                "ms": round_ms(*ms),
                "count": count,
                "avg_ms": round_ms(ms / count as f64),
            });
            let _ = writeln!(writer, "{line}");
        }
    }
}

fn summary_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("print_export_perf.log");
    let stem = file_name
        .rsplit_once('.')
        .map(|(s, _)| s)
        .unwrap_or(file_name);
    path.with_file_name(format!("{stem}_totals.log"))
}

fn round_ms(ms: f64) -> f64 {
    (ms * 1000.0).round() / 1000.0
}

/// Per-request stage clock. Always keeps its own record; writes to the journal when one is set.
#[derive(Debug)]
pub struct StageTimer {
    journal: Option<PerfJournal>,
    request: u64,
    stages: Vec<(&'static str, f64)>,
}

impl StageTimer {
    pub fn new(journal: Option<PerfJournal>) -> Self {
        let request = journal.as_ref().map(|j| j.next_request_id()).unwrap_or(0);
        Self {
            journal,
            request,
            stages: Vec::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn time<T>(&mut self, stage: &'static str, f: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let out = f();
        let ms = started.elapsed().as_secs_f64() * 1000.0;
        if let Some(journal) = &self.journal {
            journal.log_span_ms(stage, self.request, ms);
        }
        self.stages.push((stage, ms));
        out
    }

    pub fn count(&self, name: &str, counts: &[(&str, u64)]) {
        if let Some(journal) = &self.journal {
            journal.log_counts(name, self.request, counts);
        }
    }

    pub fn stages(&self) -> &[(&'static str, f64)] {
        &self.stages
    }

    pub fn total_ms(&self) -> f64 {
        self.stages.iter().map(|(_, ms)| ms).sum()
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        if let Some(journal) = &self.journal {
            journal.flush();
        }
    }
}

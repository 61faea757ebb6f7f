use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logscope_reader::{Reader, ReaderError};
use logscope_types::{ArcRecord, KeyMap, SchemaConfig};

use crate::filter::{self, CompileError, Expression};
use crate::parser::LogParser;
use crate::sampler::infer_schema;
use crate::settings::EngineSettings;
use crate::store::{Classified, LogStore};

/// Records classified between cooperative yields during a sweep
const SWEEP_YIELD_EVERY: usize = 256;

/// Lifecycle of an engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Streaming,
    Stopped,
}

/// Notifications for the presentation layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// Jump to the newest record (only while following)
    ScrollToEnd,
    /// The view or counters changed
    Redraw,
    /// The active filter failed on a record and was reset to "no filter"
    FilterError(String),
    /// A source died; the session is over
    StreamFailed(String),
    /// No more input will arrive
    Stopped,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine already started")]
    AlreadyStarted,

    #[error("engine has no line source: {0}")]
    NoLines(&'static str),

    #[error(transparent)]
    Reader(#[from] ReaderError),
}

/// A filter change waiting to be activated
#[derive(Clone, Debug, Default)]
struct FilterRequest {
    generation: u64,
    expr: Option<Arc<Expression>>,
}

struct Shared {
    store: Mutex<LogStore>,
    keys: RwLock<Arc<KeyMap>>,
    schema: RwLock<SchemaConfig>,

    requests: watch::Sender<FilterRequest>,
    /// Cancelled whenever a newer request is posted
    sweep: Mutex<CancellationToken>,
    new_records: Notify,
    /// Cancelled when a source dies; ingestion ends without draining
    input_failed: CancellationToken,

    state: Mutex<EngineState>,
    following: AtomicBool,
    template_editing: AtomicBool,

    events: mpsc::UnboundedSender<EngineEvent>,
    shutdown: CancellationToken,
    settings: EngineSettings,
}

/// Ingests lines from a [`Reader`] and keeps the filtered view current.
///
/// Two tasks share the store: the ingest task appends and classifies new
/// records, the refilter task replays the buffer after a filter change.
/// Filter changes can be submitted at any time, including mid-replay.
pub struct Engine {
    shared: Arc<Shared>,
    reader: Option<Reader>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Create an idle engine and the receiver for its events
    pub fn new(settings: EngineSettings) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (requests, _) = watch::channel(FilterRequest::default());
        let shared = Arc::new(Shared {
            store: Mutex::new(LogStore::new()),
            keys: RwLock::new(Arc::new(KeyMap::new())),
            schema: RwLock::new(SchemaConfig::default()),
            requests,
            sweep: Mutex::new(CancellationToken::new()),
            new_records: Notify::new(),
            input_failed: CancellationToken::new(),
            state: Mutex::new(EngineState::Idle),
            following: AtomicBool::new(settings.follow),
            template_editing: AtomicBool::new(false),
            events,
            shutdown: CancellationToken::new(),
            settings,
        });

        let engine = Self {
            shared,
            reader: None,
            tasks: Vec::new(),
        };
        (engine, events_rx)
    }

    /// Start the reader and the ingest and refilter tasks.
    ///
    /// If the reader cannot start, the engine moves to `Stopped` and the
    /// reader's error is returned.
    pub async fn start(&mut self, mut reader: Reader) -> Result<(), EngineError> {
        if *self.shared.state.lock() != EngineState::Idle {
            return Err(EngineError::AlreadyStarted);
        }

        let Some(lines) = reader.take_lines() else {
            self.shared.finish(None);
            return Err(EngineError::NoLines("line receiver already taken"));
        };

        let shared = Arc::clone(&self.shared);
        reader.on_error(move |e| {
            shared.input_failed.cancel();
            shared.finish(Some(EngineEvent::StreamFailed(e.to_string())));
        });

        if let Err(e) = reader.start().await {
            warn!(error = %e, "reader failed to start");
            reader.close().await;
            self.shared.finish(None);
            return Err(e.into());
        }

        {
            // A source may already have failed and stopped the engine
            let mut state = self.shared.state.lock();
            if *state == EngineState::Idle {
                *state = EngineState::Streaming;
            }
        }
        info!(kind = ?reader.kind(), "engine streaming");

        self.tasks
            .push(tokio::spawn(ingest_loop(Arc::clone(&self.shared), lines)));
        self.tasks
            .push(tokio::spawn(refilter_loop(Arc::clone(&self.shared))));
        self.reader = Some(reader);
        Ok(())
    }

    /// Close the reader and stop both tasks. Safe to call more than once.
    pub async fn stop(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.close().await;
        }
        self.shared.shutdown.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "engine task panicked");
            }
        }
        self.shared.finish(None);
    }

    // ========================================================================
    // Filter control
    // ========================================================================

    /// Compile and post a new filter. A blank query clears the filter. On a
    /// compile error the active filter is left untouched.
    pub fn submit_filter(&self, query: &str) -> Result<(), CompileError> {
        let expr = filter::compile(query)?;
        match &expr {
            Some(expr) => debug!(filter = %expr, "filter submitted"),
            None => debug!("filter cleared"),
        }
        self.shared.post_filter(expr.map(Arc::new));
        Ok(())
    }

    /// Post "no filter"
    pub fn clear_filter(&self) {
        self.shared.post_filter(None);
    }

    /// Expression the view currently reflects
    pub fn active_filter(&self) -> Option<Arc<Expression>> {
        self.shared.store.lock().active()
    }

    pub fn set_following(&self, following: bool) {
        self.shared.following.store(following, Ordering::Relaxed);
    }

    pub fn is_following(&self) -> bool {
        self.shared.following.load(Ordering::Relaxed)
    }

    // ========================================================================
    // View access
    // ========================================================================

    pub fn matched_count(&self) -> usize {
        self.shared.store.lock().matched_count()
    }

    /// Number of records in the full buffer
    pub fn total_count(&self) -> usize {
        self.shared.store.lock().len()
    }

    pub fn view_len(&self) -> usize {
        self.shared.store.lock().view_len()
    }

    pub fn view_record(&self, position: usize) -> Option<ArcRecord> {
        self.shared.store.lock().view_record(position)
    }

    pub fn view_range(&self, start: usize, count: usize) -> Vec<ArcRecord> {
        self.shared.store.lock().view_range(start, count)
    }

    /// Copy of the whole view
    pub fn view_snapshot(&self) -> Vec<ArcRecord> {
        let store = self.shared.store.lock();
        store.view_range(0, store.view_len())
    }

    /// Generation of the filter the view was built under. Changes whenever
    /// the view is rebuilt from scratch.
    pub fn view_generation(&self) -> u64 {
        self.shared.store.lock().generation()
    }

    /// View records from `start` onwards, with the generation they belong to
    pub fn view_from(&self, start: usize) -> (u64, Vec<ArcRecord>) {
        let store = self.shared.store.lock();
        let count = store.view_len().saturating_sub(start);
        (store.generation(), store.view_range(start, count))
    }

    /// Record of the full buffer by index
    pub fn record(&self, index: usize) -> Option<ArcRecord> {
        self.shared.store.lock().get(index)
    }

    /// Whether the view reflects the newest filter over every record seen
    pub fn is_settled(&self) -> bool {
        let pending = self.shared.requests.borrow().generation;
        let store = self.shared.store.lock();
        store.generation() == pending && store.is_caught_up()
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state.lock()
    }

    // ========================================================================
    // Schema
    // ========================================================================

    pub fn key_map(&self) -> Arc<KeyMap> {
        Arc::clone(&self.shared.keys.read())
    }

    pub fn schema(&self) -> SchemaConfig {
        self.shared.schema.read().clone()
    }

    /// Activate a persisted schema. A named schema turns the sampler off.
    pub fn load_schema(&self, schema: SchemaConfig) {
        debug!(
            name = schema.last_saved_name.as_deref().unwrap_or(""),
            keys = schema.keys.len(),
            "schema loaded"
        );
        let key_map = Arc::new(schema.key_map());
        *self.shared.schema.write() = schema;
        *self.shared.keys.write() = key_map;
    }

    /// Pause the sampler while the template view is being edited
    pub fn set_template_editing(&self, editing: bool) {
        self.shared.template_editing.store(editing, Ordering::Relaxed);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

impl Shared {
    fn post_filter(&self, expr: Option<Arc<Expression>>) {
        self.requests.send_modify(|request| {
            request.generation += 1;
            request.expr = expr;
        });
        let previous = std::mem::take(&mut *self.sweep.lock());
        previous.cancel();
    }

    /// Activate the newest request if the store has not seen it yet.
    /// Caller holds the store lock.
    fn sync_filter(&self, store: &mut LogStore) -> bool {
        let request = self.requests.borrow().clone();
        let activated = store.activate(request.generation, request.expr);
        if activated {
            debug!(generation = request.generation, "filter activated");
        }
        activated
    }

    fn emit(&self, event: EngineEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    /// Move to `Stopped` once, announcing `event` first when given
    fn finish(&self, event: Option<EngineEvent>) {
        let transitioned = {
            let mut state = self.state.lock();
            let was = *state;
            *state = EngineState::Stopped;
            was != EngineState::Stopped
        };
        if let Some(event) = event {
            self.emit(event);
        }
        if transitioned {
            debug!("engine stopped");
            self.emit(EngineEvent::Stopped);
        }
    }

    /// Classify one record at the cursor under the lock, then handle the
    /// outcome with the lock released
    fn step(&self, store: &mut LogStore) -> Step {
        let keys = Arc::clone(&self.keys.read());
        match store.classify_next(&keys) {
            Classified::Matched => {
                let sample = self
                    .sampling()
                    .then(|| store.view_tail(self.settings.sample_size));
                Step::Matched(sample)
            }
            Classified::Rejected => Step::Rejected,
            Classified::Failed(e) => Step::Failed(e.to_string()),
            Classified::CaughtUp | Classified::Halted => Step::Idle,
        }
    }

    fn sampling(&self) -> bool {
        !self.template_editing.load(Ordering::Relaxed) && !self.schema.read().is_saved()
    }

    /// Post-lock half of a step. Returns true if the view changed.
    fn settle(&self, step: Step) -> bool {
        match step {
            Step::Matched(sample) => {
                if let Some(sample) = sample {
                    self.resample(&sample);
                }
                true
            }
            Step::Rejected => true,
            Step::Failed(reason) => {
                warn!(error = %reason, "filter failed, clearing it");
                self.emit(EngineEvent::FilterError(reason));
                self.post_filter(None);
                true
            }
            Step::Idle => false,
        }
    }

    fn resample(&self, sample: &[ArcRecord]) {
        let existing = self.schema.read().keys.clone();
        let (schema, key_map) = infer_schema(sample, &existing);

        let mut current = self.schema.write();
        // A named schema may have been loaded meanwhile
        if current.is_saved() || current.keys == schema.keys {
            return;
        }
        *current = schema;
        *self.keys.write() = Arc::new(key_map);
    }
}

enum Step {
    /// Matched, with the sample to infer from if the sampler is on
    Matched(Option<Vec<ArcRecord>>),
    Rejected,
    Failed(String),
    Idle,
}

async fn ingest_loop(shared: Arc<Shared>, mut lines: mpsc::Receiver<String>) {
    let batch = shared.settings.scroll_batch();

    loop {
        let line = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            _ = shared.input_failed.cancelled() => {
                debug!("input failed, ingestion halted");
                break;
            }
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            debug!("end of input");
            shared.finish(None);
            break;
        };
        if line.is_empty() {
            continue;
        }

        let record = Arc::new(LogParser::parse(&line));
        let (index, step) = {
            let mut store = shared.store.lock();
            let index = store.push(record);
            shared.sync_filter(&mut store);
            // Behind the cursor means a resweep is underway and will get here
            let step = if store.cursor() == index {
                shared.step(&mut store)
            } else {
                Step::Idle
            };
            (index, step)
        };

        shared.settle(step);
        shared.new_records.notify_one();

        if shared.following.load(Ordering::Relaxed) && (index + 1) % batch == 0 {
            shared.emit(EngineEvent::ScrollToEnd);
        }
    }
}

async fn refilter_loop(shared: Arc<Shared>) {
    let mut requests = shared.requests.subscribe();
    let redraw_interval = shared.settings.redraw_interval();
    let park_interval = shared.settings.park_interval();

    let mut last_redraw = Instant::now();
    let mut dirty = false;

    while !shared.shutdown.is_cancelled() {
        let sweep = shared.sweep.lock().clone();
        let mut classified = 0usize;

        // Sweep from the cursor to the live end, one record per lock
        loop {
            let step = {
                let mut store = shared.store.lock();
                if shared.sync_filter(&mut store) {
                    dirty = true;
                }
                shared.step(&mut store)
            };
            let failed = matches!(step, Step::Failed(_));
            if !shared.settle(step) {
                break;
            }
            dirty = true;
            if failed || sweep.is_cancelled() || shared.shutdown.is_cancelled() {
                break;
            }

            if last_redraw.elapsed() >= redraw_interval {
                shared.emit(EngineEvent::Redraw);
                last_redraw = Instant::now();
                dirty = false;
            }

            classified += 1;
            if classified % SWEEP_YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }

        if sweep.is_cancelled() {
            continue;
        }

        // At the live end: flush pending changes, rate limited by the park interval
        if dirty && last_redraw.elapsed() >= park_interval {
            shared.emit(EngineEvent::Redraw);
            last_redraw = Instant::now();
            dirty = false;
        }

        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            changed = requests.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shared.new_records.notified() => dirty = true,
            _ = tokio::time::sleep(park_interval) => {}
        }
    }

    debug!("refilter loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_filter_compile_error_leaves_filter() {
        let (engine, _events) = Engine::new(EngineSettings::default());
        engine.submit_filter("level = ERROR").unwrap();
        let before = engine.shared.requests.borrow().generation;
        assert!(engine.submit_filter("level ==").is_err());
        assert_eq!(engine.shared.requests.borrow().generation, before);
    }

    #[test]
    fn test_post_filter_cancels_running_sweep() {
        let (engine, _events) = Engine::new(EngineSettings::default());
        let sweep = engine.shared.sweep.lock().clone();
        engine.clear_filter();
        assert!(sweep.is_cancelled());
        assert!(!engine.shared.sweep.lock().is_cancelled());
    }

    #[test]
    fn test_idle_engine_state() {
        let (engine, _events) = Engine::new(EngineSettings::default());
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(engine.is_settled());
        assert_eq!(engine.total_count(), 0);
        assert!(engine.active_filter().is_none());
    }

    #[test]
    fn test_load_schema_replaces_key_map() {
        use logscope_types::{FieldKind, Key};

        let (engine, _events) = Engine::new(EngineSettings::default());
        let before = engine.key_map();
        engine.load_schema(SchemaConfig {
            last_saved_name: Some("saved".into()),
            keys: vec![Key::new("count", FieldKind::Number)],
        });
        assert!(before.is_empty());
        assert!(engine.key_map().is_numeric("count"));
        assert!(!engine.shared.sampling());
    }

    #[tokio::test]
    async fn test_finish_emits_stopped_once() {
        let (engine, mut events) = Engine::new(EngineSettings::default());
        engine.shared.finish(Some(EngineEvent::StreamFailed("boom".into())));
        engine.shared.finish(None);
        assert_eq!(events.recv().await, Some(EngineEvent::StreamFailed("boom".into())));
        assert_eq!(events.recv().await, Some(EngineEvent::Stopped));
        assert!(events.try_recv().is_err());
        assert_eq!(engine.state(), EngineState::Stopped);
    }
}

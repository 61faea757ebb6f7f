use std::sync::Arc;

use logscope_types::{ArcRecord, KeyMap};

use crate::filter::{EvalError, Expression};

/// Outcome of classifying one record
#[derive(Debug)]
pub(crate) enum Classified {
    /// Record joined the view
    Matched,
    Rejected,
    /// The active expression failed; classification halts until the next
    /// activation
    Failed(EvalError),
    /// Cursor is at the live end
    CaughtUp,
    /// A previous failure is waiting for the reset filter
    Halted,
}

/// All records seen plus the view of those matching the active filter.
///
/// The view holds indices into `records` in ascending order. Everything
/// before `cursor` has been classified against `active`; everything at or
/// after it has not.
#[derive(Default)]
pub struct LogStore {
    records: Vec<ArcRecord>,
    view: Vec<usize>,
    matched: usize,

    active: Option<Arc<Expression>>,
    generation: u64,
    cursor: usize,
    halted: bool,
}

impl LogStore {
    /// Create an empty store with no filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, returning its index
    pub fn push(&mut self, record: ArcRecord) -> usize {
        self.records.push(record);
        self.records.len() - 1
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<ArcRecord> {
        self.records.get(index).cloned()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn active(&self) -> Option<Arc<Expression>> {
        self.active.clone()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Install the expression of a newer request: clears the view and the
    /// counter and restarts classification from the first record. Requests
    /// not newer than the active one are ignored.
    pub fn activate(&mut self, generation: u64, expr: Option<Arc<Expression>>) -> bool {
        if generation <= self.generation {
            return false;
        }
        self.generation = generation;
        self.active = expr;
        self.view.clear();
        self.matched = 0;
        self.cursor = 0;
        self.halted = false;
        true
    }

    /// Whether every record has been classified against the active filter
    pub fn is_caught_up(&self) -> bool {
        self.cursor == self.records.len()
    }

    /// Classify the record at the cursor and advance past it
    pub(crate) fn classify_next(&mut self, keys: &KeyMap) -> Classified {
        if self.halted {
            return Classified::Halted;
        }
        let index = self.cursor;
        let Some(record) = self.records.get(index) else {
            return Classified::CaughtUp;
        };

        let verdict = match &self.active {
            None => Ok(true),
            Some(expr) => expr.apply(record, keys),
        };

        match verdict {
            Ok(true) => {
                self.view.push(index);
                self.matched += 1;
                self.cursor += 1;
                Classified::Matched
            }
            Ok(false) => {
                self.cursor += 1;
                Classified::Rejected
            }
            Err(e) => {
                self.halted = true;
                Classified::Failed(e)
            }
        }
    }

    // ========================================================================
    // Filtered view
    // ========================================================================

    pub fn matched_count(&self) -> usize {
        self.matched
    }

    pub fn view_len(&self) -> usize {
        self.view.len()
    }

    /// Record at a position of the view
    pub fn view_record(&self, position: usize) -> Option<ArcRecord> {
        self.view
            .get(position)
            .and_then(|&index| self.records.get(index))
            .cloned()
    }

    /// Records in a range of the view (for virtual scrolling)
    pub fn view_range(&self, start: usize, count: usize) -> Vec<ArcRecord> {
        self.view
            .iter()
            .skip(start)
            .take(count)
            .filter_map(|&index| self.records.get(index).cloned())
            .collect()
    }

    /// The last `n` records of the view, oldest first
    pub fn view_tail(&self, n: usize) -> Vec<ArcRecord> {
        let start = self.view.len().saturating_sub(n);
        self.view_range(start, n)
    }

    pub fn view_indices(&self) -> &[usize] {
        &self.view
    }
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("records", &self.records.len())
            .field("view", &self.view.len())
            .field("generation", &self.generation)
            .field("cursor", &self.cursor)
            .field("halted", &self.halted)
            .finish()
    }
}

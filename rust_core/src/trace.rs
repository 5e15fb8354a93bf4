use serde::{Deserialize, Serialize};

/// One state of the chain as it is recorded in the trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub w: Vec<f64>,
    pub tau_sq: f64,
    pub pred_train: Vec<f64>,
    pub pred_test: Vec<f64>,
    pub rmse_train: f64,
    pub rmse_test: f64,
}

/// Append-only record of a chain.
///
/// Entry 0 is the initial state. Every later entry is either a freshly
/// accepted proposal or a copy of its predecessor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PosteriorTrace {
    entries: Vec<TraceEntry>,
}

impl PosteriorTrace {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }

    /// Record a rejection: duplicate the last entry.
    pub(crate) fn repeat_last(&mut self) {
        if let Some(last) = self.entries.last().cloned() {
            self.entries.push(last);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&TraceEntry> {
        self.entries.get(i)
    }

    pub fn last(&self) -> Option<&TraceEntry> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TraceEntry> {
        self.entries.iter()
    }

    /// Number of transitions whose entry differs from its predecessor.
    pub fn moves(&self) -> usize {
        self.entries.windows(2).filter(|w| w[0] != w[1]).count()
    }

    pub fn weights(&self) -> Vec<Vec<f64>> {
        self.entries.iter().map(|e| e.w.clone()).collect()
    }

    pub fn tau_sq(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.tau_sq).collect()
    }

    pub fn rmse_train(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.rmse_train).collect()
    }

    pub fn rmse_test(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.rmse_test).collect()
    }
}

impl<'a> IntoIterator for &'a PosteriorTrace {
    type Item = &'a TraceEntry;
    type IntoIter = std::slice::Iter<'a, TraceEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

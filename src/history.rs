/// Entries that carry a whole-book position can be compared by it, so that
/// passive relocations to the same spot do not pile up in the history.
pub trait HistoryEntry {
    fn fraction(&self) -> Option<f64> {
        None
    }
}

impl HistoryEntry for String {}
impl HistoryEntry for &str {}
impl HistoryEntry for usize {}

impl HistoryEntry for crate::navigation::Target {
    fn fraction(&self) -> Option<f64> {
        self.as_fraction()
    }
}

/// Back/forward stack with browser semantics.
#[derive(Debug, Clone)]
pub struct History<T> {
    entries: Vec<T>,
    /// Index of the current entry; `None` while empty.
    index: Option<usize>,
    /// Oldest entries are dropped past this many.
    limit: Option<usize>,
}

impl<T> Default for History<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: None,
            limit: None,
        }
    }
}

impl<T: Clone + PartialEq + HistoryEntry> History<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            limit: limit.map(|l| l.max(1)),
            ..Self::default()
        }
    }

    /// Pushes `state`, dropping everything ahead of the current entry.
    pub fn push_state(&mut self, state: T) {
        if let Some(last) = self.current() {
            if *last == state {
                return;
            }
            if let (Some(a), Some(b)) = (last.fraction(), state.fraction()) {
                if a != 0.0 && a == b {
                    return;
                }
            }
        }
        let next = self.index.map_or(0, |i| i + 1);
        self.entries.truncate(next);
        self.entries.push(state);
        self.index = Some(next);
        if let Some(limit) = self.limit
            && self.entries.len() > limit
        {
            let excess = self.entries.len() - limit;
            self.entries.drain(..excess);
            self.index = Some(next - excess);
        }
    }

    pub fn replace_state(&mut self, state: T) {
        match self.index {
            Some(i) => self.entries[i] = state,
            None => self.push_state(state),
        }
    }

    pub fn back(&mut self) -> Option<&T> {
        let i = self.index.filter(|&i| i > 0)? - 1;
        self.index = Some(i);
        self.entries.get(i)
    }

    pub fn forward(&mut self) -> Option<&T> {
        let i = self.index? + 1;
        if i >= self.entries.len() {
            return None;
        }
        self.index = Some(i);
        self.entries.get(i)
    }

    pub fn current(&self) -> Option<&T> {
        self.entries.get(self.index?)
    }

    pub fn can_go_back(&self) -> bool {
        self.index.is_some_and(|i| i > 0)
    }

    pub fn can_go_forward(&self) -> bool {
        self.index.is_some_and(|i| i + 1 < self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index = None;
    }
}

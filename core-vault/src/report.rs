//! Per-item batch outcomes

/// One item that could not be processed. The batch carried on without it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub item: String,
    pub message: String,
}

/// Result of a batch where single items may fail independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport<T> {
    pub completed: Vec<T>,
    pub failed: Vec<ItemFailure>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            completed: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> BatchReport<T> {
    pub fn succeeded(&mut self, item: T) {
        self.completed.push(item);
    }

    pub fn record_failure(&mut self, item: impl ToString, error: impl ToString) {
        self.failed.push(ItemFailure {
            item: item.to_string(),
            message: error.to_string(),
        });
    }

    pub fn completed_count(&self) -> u64 {
        self.completed.len() as u64
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.len() as u64
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

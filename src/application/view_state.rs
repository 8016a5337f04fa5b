// View state held by a coordinator and read by the presentation layer
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of a "latest" read: rows were found, or the table had none.
#[derive(Debug, Clone, PartialEq)]
pub enum Latest<T> {
    Found(T),
    Empty,
}

impl<T> Latest<T> {
    pub fn unwrap_or_else(self, fallback: impl FnOnce() -> T) -> T {
        match self {
            Latest::Found(value) => value,
            Latest::Empty => fallback(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Latest::Empty)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewState<T> {
    pub value: Option<T>,
    pub loading: bool,
    pub error: Option<String>,
    /// Bumped every time a new value is applied.
    pub revision: u64,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    applied_seq: u64,
}

impl<T> Default for ViewState<T> {
    fn default() -> Self {
        Self {
            value: None,
            loading: true,
            error: None,
            revision: 0,
            updated_at: None,
            applied_seq: 0,
        }
    }
}

impl<T> ViewState<T> {
    /// Apply the result of request `seq`.
    ///
    /// Responses older than the last applied one are dropped and `false` is
    /// returned. A successful value clears any previous error; an error keeps
    /// the last good value.
    pub fn apply(&mut self, seq: u64, outcome: Result<T, String>) -> bool {
        if seq <= self.applied_seq {
            return false;
        }
        self.applied_seq = seq;
        self.loading = false;

        match outcome {
            Ok(value) => {
                self.value = Some(value);
                self.error = None;
                self.revision += 1;
                self.updated_at = Some(Utc::now());
            }
            Err(message) => {
                self.error = Some(message);
            }
        }
        true
    }
}

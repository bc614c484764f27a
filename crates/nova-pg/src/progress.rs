//! Transfer progress accounting.
//!
//! Progress is observational only: nothing in the transfer paths branches
//! on it.

/// Rows transferred so far against an expected total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressState {
    /// Rows transferred so far
    pub transferred: u64,
    /// Expected total; an estimate on the read path, exact on the write path
    pub estimate: u64,
}

impl ProgressState {
    /// Start at zero rows against `estimate`
    pub fn new(estimate: u64) -> Self {
        Self {
            transferred: 0,
            estimate,
        }
    }

    /// Record `rows` more rows
    #[inline]
    pub fn advance(&mut self, rows: u64) {
        self.transferred = self.transferred.saturating_add(rows);
    }

    /// Completed share in `[0.0, 1.0]`.
    ///
    /// Estimates can undershoot, so the value is clamped; a zero
    /// estimate reports 0.0 until the transfer finishes.
    pub fn fraction(&self) -> f64 {
        if self.estimate == 0 {
            return 0.0;
        }
        (self.transferred as f64 / self.estimate as f64).min(1.0)
    }
}

impl std::fmt::Display for ProgressState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} rows ({:.1}%)",
            self.transferred,
            self.estimate,
            self.fraction() * 100.0
        )
    }
}

/// Receives progress after every batch
pub trait ProgressObserver: Send {
    /// Called once per transferred batch, in order
    fn on_batch(&mut self, progress: &ProgressState);
}

impl<F> ProgressObserver for F
where
    F: FnMut(&ProgressState) + Send,
{
    fn on_batch(&mut self, progress: &ProgressState) {
        self(progress)
    }
}

//! Operational parameters for the collective and independent I/O paths.

use crate::error::{Error, Result};

/// Whether the collective optimization is applied for a direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CollectiveMode {
    /// Always use the two-phase engine.
    Enable,
    /// Always use per-rank independent I/O.
    Disable,
    /// Use the two-phase engine only when the per-rank access ranges are
    /// interleaved.
    #[default]
    Automatic,
}

/// Tuning hints recognized by the engine. All sizes are in bytes.
#[derive(Clone, Debug)]
pub struct Hints {
    /// Staging buffer capacity per aggregator round.
    pub cb_buffer_size: usize,
    /// Number of aggregator ranks; defaults to the communicator size.
    pub cb_nodes: Option<usize>,
    /// Collective mode for reads.
    pub cb_read: CollectiveMode,
    /// Collective mode for writes.
    pub cb_write: CollectiveMode,
    /// Rolling window size for independent strided reads.
    pub ind_rd_buffer_size: usize,
    /// Rolling window size for independent strided writes.
    pub ind_wr_buffer_size: usize,
}

impl Default for Hints {
    fn default() -> Self {
        Self {
            cb_buffer_size: 4 * 1024 * 1024,
            cb_nodes: None,
            cb_read: CollectiveMode::Automatic,
            cb_write: CollectiveMode::Automatic,
            ind_rd_buffer_size: 4 * 1024 * 1024,
            ind_wr_buffer_size: 512 * 1024,
        }
    }
}

impl Hints {
    /// Check the hints before any I/O is issued.
    pub fn validate(&self) -> Result<()> {
        if self.cb_buffer_size == 0 {
            return Err(Error::Config("cb_buffer_size must be positive".into()));
        }
        if let Some(n) = self.cb_nodes {
            if n == 0 {
                return Err(Error::Config("cb_nodes must be positive".into()));
            }
        }
        if self.ind_rd_buffer_size == 0 {
            return Err(Error::Config("ind_rd_buffer_size must be positive".into()));
        }
        if self.ind_wr_buffer_size == 0 {
            return Err(Error::Config("ind_wr_buffer_size must be positive".into()));
        }
        Ok(())
    }

    /// Number of aggregators for a communicator of `nprocs` ranks.
    /// Aggregators are ranks `0..cb_nodes`, clamped to the communicator
    /// size.
    pub fn aggregator_count(&self, nprocs: usize) -> usize {
        self.cb_nodes.unwrap_or(nprocs).min(nprocs).max(1)
    }
}

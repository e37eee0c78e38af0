//! Engine configuration.

/// Tunables for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Render passes allowed within one synchronous update.
    ///
    /// Immediate-lane effects that write state re-enter the reconciler before paint; an update
    /// that has not settled after this many passes fails with
    /// [`EngineError::UpdateDepthExceeded`](crate::EngineError).
    pub max_sync_passes: usize,

    /// Maximum number of deferred effects run per [`Engine::run_deferred`](crate::Engine)
    /// call. Leftover effects stay queued and another slot is requested from the host.
    ///
    /// `None` runs the whole queue.
    pub max_deferred_batch: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_sync_passes: 50,
            max_deferred_batch: None,
        }
    }
}

impl EngineConfig {
    pub fn with_max_sync_passes(mut self, passes: usize) -> Self {
        assert!(passes > 0, "at least one render pass is required");
        self.max_sync_passes = passes;
        self
    }

    pub fn with_max_deferred_batch(mut self, batch: usize) -> Self {
        assert!(batch > 0, "deferred batch must make progress");
        self.max_deferred_batch = Some(batch);
        self
    }
}

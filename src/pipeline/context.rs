use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::PipelineConfig;
use crate::{PileupError, Result};

/// Shared flag asking a running pipeline to stop before commit.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State owned by one pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    config: PipelineConfig,
    started: Instant,
    cancel: CancelToken,
}

impl PipelineContext {
    /// Context for a run starting now.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            started: Instant::now(),
            cancel: CancelToken::new(),
        }
    }

    /// Use an externally held cancel token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run settings.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Token observed by workers.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Wall time since the run started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// `Err(Cancelled)` once cancellation has been requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(PileupError::Cancelled)
        } else {
            Ok(())
        }
    }
}

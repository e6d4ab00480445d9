//! Scoped policy context
//!
//! A policy context is acquired when a cache operation starts and must be
//! released on every exit path. `PolicyScope::finish` releases it and folds a
//! release failure into the operation result; dropping an unfinished scope
//! (early return, cancelled future) still releases it and logs the failure.

use super::{PolicyContext, PolicyProvider, SystemContext};
use crate::error::{CacheError, CacheResult};
use tracing::{debug, warn};

/// Policy context bound to the lifetime of one cache operation
pub struct PolicyScope {
    context: Box<dyn PolicyContext>,
    released: bool,
}

impl PolicyScope {
    /// Acquire a policy context from `provider`
    pub fn acquire(provider: &dyn PolicyProvider, system: &SystemContext) -> CacheResult<Self> {
        let context = provider.acquire(system).map_err(CacheError::PolicyAcquire)?;
        debug!("Acquired policy context");
        Ok(Self {
            context,
            released: false,
        })
    }

    /// The acquired context, for handing to the transfer engine
    pub fn context(&self) -> &dyn PolicyContext {
        self.context.as_ref()
    }

    /// Release the context and merge the outcome with `result`.
    ///
    /// An earlier error is never replaced: a release failure is attached to it.
    pub fn finish<T>(mut self, result: CacheResult<T>) -> CacheResult<T> {
        self.released = true;
        match (result, self.context.release()) {
            (result, Ok(())) => result,
            (Ok(_), Err(release)) => Err(CacheError::PolicyRelease(release)),
            (Err(err), Err(release)) => Err(err.with_release_failure(release)),
        }
    }
}

impl Drop for PolicyScope {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.context.release() {
            warn!(error = %e, "Failed to release policy context");
        }
    }
}

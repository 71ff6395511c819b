use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Exclusive hold on one environment. Released when dropped.
#[derive(Debug)]
pub struct EnvironmentLease {
    environment_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl EnvironmentLease {
    pub fn environment_id(&self) -> &str {
        &self.environment_id
    }
}

impl Drop for EnvironmentLease {
    fn drop(&mut self) {
        debug!(environment = %self.environment_id, "Environment lease released");
    }
}

/// One async mutex per environment id.
///
/// Submissions targeting the same environment queue on its lock for the whole
/// prepare, dispatch and teardown span. Different environments do not contend.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl EnvironmentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, environment_id: &str) -> Arc<AsyncMutex<()>> {
        // The std mutex only guards the map and is never held across an await.
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(environment_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait until the environment is free and take it
    pub async fn acquire(&self, environment_id: &str) -> EnvironmentLease {
        let guard = self.lock_for(environment_id).lock_owned().await;
        debug!(environment = %environment_id, "Environment lease acquired");
        EnvironmentLease {
            environment_id: environment_id.to_string(),
            _guard: guard,
        }
    }

    /// Take the environment only if nobody holds it
    pub fn try_acquire(&self, environment_id: &str) -> Option<EnvironmentLease> {
        self.lock_for(environment_id)
            .try_lock_owned()
            .ok()
            .map(|guard| EnvironmentLease {
                environment_id: environment_id.to_string(),
                _guard: guard,
            })
    }
}

use crate::config::{LimitsConfig, MAX_STAGE_CONCURRENCY};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Configured permits per stage, after clamping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLimitsSnapshot {
    pub parse: usize,
    pub embed: usize,
    pub tools: usize,
    pub agents: usize,
    pub groups: usize,
}

/// One semaphore per stage, shared by every worker of a run.
///
/// The embed semaphore is handed to the embedder so provider calls stay
/// bounded no matter how many groups run at once.
#[derive(Debug, Clone)]
pub struct StageLimits {
    pub parse: Arc<Semaphore>,
    pub embed: Arc<Semaphore>,
    pub tools: Arc<Semaphore>,
    pub agents: Arc<Semaphore>,
    pub groups: Arc<Semaphore>,
    snapshot: StageLimitsSnapshot,
}

fn clamp_limit(value: usize) -> usize {
    value.clamp(1, MAX_STAGE_CONCURRENCY)
}

impl StageLimits {
    pub fn from_config(config: &LimitsConfig) -> Self {
        let snapshot = StageLimitsSnapshot {
            parse: clamp_limit(config.parse),
            embed: clamp_limit(config.embed),
            tools: clamp_limit(config.tools),
            agents: clamp_limit(config.agents),
            groups: clamp_limit(config.groups),
        };
        Self {
            parse: Arc::new(Semaphore::new(snapshot.parse)),
            embed: Arc::new(Semaphore::new(snapshot.embed)),
            tools: Arc::new(Semaphore::new(snapshot.tools)),
            agents: Arc::new(Semaphore::new(snapshot.agents)),
            groups: Arc::new(Semaphore::new(snapshot.groups)),
            snapshot,
        }
    }

    pub fn snapshot(&self) -> StageLimitsSnapshot {
        self.snapshot
    }
}

/// Waits for a permit. The semaphores are never closed.
pub(crate) async fn acquire(semaphore: &Arc<Semaphore>) -> Option<OwnedSemaphorePermit> {
    Arc::clone(semaphore).acquire_owned().await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn limits_are_clamped() {
        let limits = StageLimits::from_config(&LimitsConfig {
            parse: 0,
            embed: 500,
            tools: 4,
            agents: 1,
            groups: 2,
        });
        assert_eq!(
            limits.snapshot(),
            StageLimitsSnapshot {
                parse: 1,
                embed: MAX_STAGE_CONCURRENCY,
                tools: 4,
                agents: 1,
                groups: 2,
            }
        );
        assert_eq!(limits.tools.available_permits(), 4);
    }

    #[tokio::test]
    async fn permits_bound_concurrency() {
        let limits = StageLimits::from_config(&LimitsConfig {
            parse: 1,
            embed: 1,
            tools: 1,
            agents: 1,
            groups: 1,
        });
        let held = acquire(&limits.agents).await.unwrap();
        assert_eq!(limits.agents.available_permits(), 0);
        drop(held);
        assert_eq!(limits.agents.available_permits(), 1);
    }
}

//! Append-only results collector shared by the worker pool.

use std::sync::Arc;

use tokio::sync::Mutex;
use unitforge_core::ExecutionResult;

/// Workers push exactly one result each; the orchestrator drains after the
/// pool has finished.
#[derive(Debug, Clone, Default)]
pub struct ResultsCollector {
    inner: Arc<Mutex<Vec<ExecutionResult>>>,
}

impl ResultsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, result: ExecutionResult) {
        self.inner.lock().await.push(result);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Take every result, ordered by artifact id.
    pub async fn drain(&self) -> Vec<ExecutionResult> {
        let mut results = std::mem::take(&mut *self.inner.lock().await);
        results.sort_by(|a, b| a.artifact_id.cmp(&b.artifact_id));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unitforge_core::Outcome;

    #[tokio::test]
    async fn test_concurrent_pushes_are_all_kept() {
        let collector = ResultsCollector::new();
        let mut handles = Vec::new();
        for i in 0..16 {
            let collector = collector.clone();
            handles.push(tokio::spawn(async move {
                collector
                    .push(ExecutionResult::new(format!("a{:02}", i), "s", Outcome::CompiledPassed))
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(collector.len().await, 16);

        let results = collector.drain().await;
        assert_eq!(results.len(), 16);
        assert_eq!(results[0].artifact_id, "a00");
        assert_eq!(results[15].artifact_id, "a15");
        assert_eq!(collector.len().await, 0);
    }
}

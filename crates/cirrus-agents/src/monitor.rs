use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Working,
    Error,
}

/// Counters kept per supervised worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerMetrics {
    pub tasks_started: u32,
    pub tasks_completed: u32,
    pub errors: u32,
    pub duration_ms: u64,
}

/// Real-time snapshot of one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerState {
    pub name: String,
    pub skills: Vec<String>,
    pub status: WorkerStatus,
    pub current_task: Option<String>,
    pub in_flight: u32,
    pub metrics: WorkerMetrics,
}

/// Tracks state and metrics for every worker of a supervisor, addressed by
/// registration index.
#[derive(Default)]
pub struct WorkerMonitor {
    states: RwLock<Vec<WorkerState>>,
}

impl WorkerMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a worker and return its index.
    pub async fn register(&self, name: &str, skills: Vec<String>) -> usize {
        let mut states = self.states.write().await;
        states.push(WorkerState {
            name: name.to_string(),
            skills,
            status: WorkerStatus::Idle,
            current_task: None,
            in_flight: 0,
            metrics: WorkerMetrics::default(),
        });
        states.len() - 1
    }

    /// Mark a worker as working on `task`.
    pub async fn start_task(&self, worker: usize, task: &str) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(worker) {
            state.current_task = Some(task.to_string());
            state.status = WorkerStatus::Working;
            state.in_flight += 1;
            state.metrics.tasks_started += 1;
        }
    }

    /// Record the end of a task. The worker goes back to idle once nothing
    /// is in flight, or to error if this task failed.
    pub async fn finish_task(&self, worker: usize, duration_ms: u64, success: bool) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(worker) {
            state.in_flight = state.in_flight.saturating_sub(1);
            state.metrics.duration_ms += duration_ms;
            if success {
                state.metrics.tasks_completed += 1;
            } else {
                state.metrics.errors += 1;
            }
            if state.in_flight == 0 {
                state.current_task = None;
                state.status = if success {
                    WorkerStatus::Idle
                } else {
                    WorkerStatus::Error
                };
            }
        }
    }

    pub async fn snapshot(&self) -> Vec<WorkerState> {
        self.states.read().await.clone()
    }

    pub async fn get_state(&self, worker: usize) -> Option<WorkerState> {
        self.states.read().await.get(worker).cloned()
    }

    /// Aggregate metrics across all workers.
    pub async fn aggregate_metrics(&self) -> WorkerMetrics {
        let states = self.states.read().await;
        states.iter().fold(WorkerMetrics::default(), |mut total, state| {
            total.tasks_started += state.metrics.tasks_started;
            total.tasks_completed += state.metrics.tasks_completed;
            total.errors += state.metrics.errors;
            total.duration_ms += state.metrics.duration_ms;
            total
        })
    }

    /// Serialize the current state as JSON.
    pub async fn to_json(&self) -> serde_json::Value {
        let workers = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "workers": workers,
            "aggregate": aggregate,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_starts_idle() {
        let monitor = WorkerMonitor::new();
        let idx = monitor.register("provisioner", vec!["provisioning".into()]).await;
        let state = monitor.get_state(idx).await.unwrap();
        assert_eq!(state.status, WorkerStatus::Idle);
        assert!(state.current_task.is_none());
        assert!(monitor.get_state(idx + 1).await.is_none());
    }

    #[tokio::test]
    async fn test_overlapping_tasks_keep_worker_busy() {
        let monitor = WorkerMonitor::new();
        let idx = monitor.register("w", Vec::new()).await;
        monitor.start_task(idx, "a").await;
        monitor.start_task(idx, "b").await;
        monitor.finish_task(idx, 10, true).await;

        let state = monitor.get_state(idx).await.unwrap();
        assert_eq!(state.status, WorkerStatus::Working);
        assert_eq!(state.in_flight, 1);

        monitor.finish_task(idx, 15, true).await;
        let state = monitor.get_state(idx).await.unwrap();
        assert_eq!(state.status, WorkerStatus::Idle);
        assert_eq!(state.metrics.tasks_completed, 2);
        assert_eq!(state.metrics.duration_ms, 25);
    }

    #[tokio::test]
    async fn test_failure_is_recorded() {
        let monitor = WorkerMonitor::new();
        let idx = monitor.register("w", Vec::new()).await;
        monitor.start_task(idx, "deploy").await;
        monitor.finish_task(idx, 5, false).await;

        let state = monitor.get_state(idx).await.unwrap();
        assert_eq!(state.status, WorkerStatus::Error);
        assert_eq!(state.metrics.errors, 1);
    }

    #[tokio::test]
    async fn test_to_json_aggregates() {
        let monitor = WorkerMonitor::new();
        let a = monitor.register("a", Vec::new()).await;
        let b = monitor.register("b", Vec::new()).await;
        monitor.start_task(a, "x").await;
        monitor.finish_task(a, 3, true).await;
        monitor.start_task(b, "y").await;
        monitor.finish_task(b, 4, false).await;

        let json = monitor.to_json().await;
        assert_eq!(json["workers"].as_array().unwrap().len(), 2);
        assert_eq!(json["aggregate"]["tasks_completed"], 1);
        assert_eq!(json["aggregate"]["errors"], 1);
        assert_eq!(json["aggregate"]["duration_ms"], 7);
    }
}

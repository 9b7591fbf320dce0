use async_trait::async_trait;
use cirrus_core::{AgentContext, CirrusError, CirrusResult, CompletionService};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How hard [`FailoverCompletion`] leans on each backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts on one backend after its first transient failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): base doubled per retry,
    /// never above the cap.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        Duration::from_millis(
            self.backoff_base_ms
                .saturating_mul(factor)
                .min(self.backoff_max_ms),
        )
    }
}

/// First token of an HTTP error message that reads as a status code.
fn http_status(message: &str) -> Option<u16> {
    message
        .split(|c: char| !c.is_ascii_digit())
        .filter(|token| token.len() == 3)
        .filter_map(|token| token.parse::<u16>().ok())
        .find(|code| (400..=599).contains(code))
}

/// Whether another attempt on the same backend could succeed.
///
/// Only transport failures qualify: 429, any 5xx, or a timeout. Parse errors,
/// bad credentials and empty responses fail the same way every time.
pub fn is_retryable(err: &CirrusError) -> bool {
    let CirrusError::Http(message) = err else {
        return false;
    };
    match http_status(message) {
        Some(code) => code == 429 || code >= 500,
        None => {
            let lower = message.to_lowercase();
            lower.contains("timed out") || lower.contains("timeout")
        }
    }
}

/// Completion service over an ordered list of backends.
///
/// Each backend gets one attempt plus up to `max_retries` retries on
/// transient errors before the next backend is tried. When all of them give
/// up, the last backend's error is returned.
pub struct FailoverCompletion {
    backends: Vec<Arc<dyn CompletionService>>,
    policy: RetryPolicy,
}

impl FailoverCompletion {
    pub fn new(backends: Vec<Arc<dyn CompletionService>>, policy: RetryPolicy) -> CirrusResult<Self> {
        if backends.is_empty() {
            return Err(CirrusError::Config(
                "failover needs at least one completion backend".into(),
            ));
        }
        Ok(Self { backends, policy })
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    async fn attempt(
        &self,
        index: usize,
        backend: &dyn CompletionService,
        prompt: &str,
        context: &AgentContext,
    ) -> CirrusResult<String> {
        let mut retry = 0;
        loop {
            let err = match backend.generate(prompt, context).await {
                Ok(text) => return Ok(text),
                Err(err) => err,
            };
            if !is_retryable(&err) || retry >= self.policy.max_retries {
                return Err(err);
            }
            let delay = self.policy.delay_for(retry);
            info!(backend = index, retry, delay = ?delay, error = %err, "Transient completion error, retrying");
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}

#[async_trait]
impl CompletionService for FailoverCompletion {
    async fn generate(&self, prompt: &str, context: &AgentContext) -> CirrusResult<String> {
        let mut last = None;
        for (index, backend) in self.backends.iter().enumerate() {
            match self.attempt(index, backend.as_ref(), prompt, context).await {
                Ok(text) => return Ok(text),
                Err(err) => {
                    warn!(backend = index, remaining = self.backends.len() - index - 1, error = %err, "Completion backend gave up");
                    last = Some(err);
                }
            }
        }
        Err(last.unwrap_or_else(|| CirrusError::Completion("no completion backend answered".into())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Plays back scripted outcomes and counts calls.
    struct Scripted {
        outcomes: Mutex<VecDeque<CirrusResult<String>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(outcomes: Vec<CirrusResult<String>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(0),
            })
        }

        fn failing(message: &str, times: usize) -> Arc<Self> {
            Self::new((0..times).map(|_| Err(CirrusError::Http(message.into()))).collect())
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl CompletionService for Scripted {
        async fn generate(&self, _prompt: &str, _context: &AgentContext) -> CirrusResult<String> {
            *self.calls.lock() += 1;
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(CirrusError::Completion("script exhausted".into())))
        }
    }

    fn failover(backends: Vec<Arc<dyn CompletionService>>) -> FailoverCompletion {
        FailoverCompletion::new(backends, RetryPolicy::default()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_retried_on_same_backend() {
        let backend = Scripted::new(vec![
            Err(CirrusError::Http("Completion API error 429 Too Many Requests: slow down".into())),
            Ok("plan".into()),
        ]);
        let service = failover(vec![backend.clone()]);

        let text = service.generate("plan this", &AgentContext::default()).await.unwrap();
        assert_eq!(text, "plan");
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_backends_return_last_error() {
        let first = Scripted::failing("Completion API error 500 Internal Server Error: boom", 4);
        let second = Scripted::failing("Completion API error 503 Service Unavailable: busy", 4);
        let service = failover(vec![first.clone(), second.clone()]);

        let err = service.generate("x", &AgentContext::default()).await.unwrap_err();
        assert!(err.to_string().contains("503"), "got: {err}");
        assert_eq!(first.calls(), 4);
        assert_eq!(second.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_skips_to_next_backend() {
        let first = Scripted::failing("Completion API error 401 Unauthorized: bad key", 1);
        let second = Scripted::new(vec![Ok("fallback".into())]);
        let service = failover(vec![first.clone(), second.clone()]);

        let text = service.generate("x", &AgentContext::default()).await.unwrap();
        assert_eq!(text, "fallback");
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
    }

    #[test]
    fn test_empty_backend_list_is_config_error() {
        let err = FailoverCompletion::new(Vec::new(), RetryPolicy::default())
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_delay_doubles_until_cap() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(10), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(200), Duration::from_millis(1_000));
    }

    #[test]
    fn test_only_transport_errors_are_retryable() {
        assert!(is_retryable(&CirrusError::Http("Completion API error 429 Too Many Requests: x".into())));
        assert!(is_retryable(&CirrusError::Http("Completion API error 502 Bad Gateway: x".into())));
        assert!(is_retryable(&CirrusError::Http("operation timed out".into())));
        assert!(!is_retryable(&CirrusError::Http("Completion API error 400 Bad Request: x".into())));
        assert!(!is_retryable(&CirrusError::Http(
            "error sending request for url (http://127.0.0.1:9/v1/chat/completions)".into()
        )));
        assert!(!is_retryable(&CirrusError::Completion("503 in the prompt text".into())));
    }
}

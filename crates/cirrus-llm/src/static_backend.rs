use async_trait::async_trait;
use cirrus_core::{AgentContext, CirrusResult, CompletionService};
use parking_lot::Mutex;
use std::collections::VecDeque;

enum Replies {
    Scripted(Mutex<VecDeque<String>>),
    Echo,
}

/// Offline completion backend.
///
/// Either replays a fixed list of replies (the last one repeats once the list
/// is exhausted) or, in echo mode, answers every prompt with a one-step JSON
/// plan quoting the prompt's first non-empty line.
pub struct StaticCompletion {
    replies: Replies,
}

impl StaticCompletion {
    /// Always answer with `reply`.
    pub fn new(reply: impl Into<String>) -> Self {
        Self::scripted(vec![reply.into()])
    }

    /// Answer with `replies` in order, repeating the last one.
    pub fn scripted(replies: Vec<String>) -> Self {
        Self {
            replies: Replies::Scripted(Mutex::new(replies.into())),
        }
    }

    /// Answer every prompt with a single MESSAGE step.
    pub fn echo() -> Self {
        Self {
            replies: Replies::Echo,
        }
    }
}

#[async_trait]
impl CompletionService for StaticCompletion {
    async fn generate(&self, prompt: &str, _context: &AgentContext) -> CirrusResult<String> {
        match &self.replies {
            Replies::Echo => {
                let first_line = prompt
                    .lines()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .unwrap_or_default();
                Ok(serde_json::json!([{
                    "kind": "message",
                    "name": "echo",
                    "content": first_line,
                }])
                .to_string())
            }
            Replies::Scripted(queue) => {
                let mut queue = queue.lock();
                let reply = if queue.len() > 1 {
                    queue.pop_front().unwrap_or_default()
                } else {
                    queue.front().cloned().unwrap_or_default()
                };
                Ok(reply)
            }
        }
    }
}

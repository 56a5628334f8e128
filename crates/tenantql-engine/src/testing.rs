//! Test doubles, compiled for this crate's tests and behind the `test-util` feature

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::backend::{GenerationBackend, GenerationError};

struct ScriptRule {
    needle: String,
    replies: VecDeque<Result<String, GenerationError>>,
}

/// Deterministic fake backend keyed on prompt substrings.
///
/// Each rule replays its replies in order and keeps repeating the last one.
/// Prompts matching no rule get a provider error.
#[derive(Default)]
pub struct ScriptedBackend {
    rules: Mutex<Vec<ScriptRule>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, needle: &str, text: impl Into<String>) -> Self {
        self.push(needle, Ok(text.into()))
    }

    pub fn fail(self, needle: &str, error: GenerationError) -> Self {
        self.push(needle, Err(error))
    }

    /// Sleep before answering, to exercise timeouts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(self, needle: &str, reply: Result<String, GenerationError>) -> Self {
        {
            let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
            match rules.iter_mut().find(|r| r.needle == needle) {
                Some(rule) => rule.replies.push_back(reply),
                None => rules.push(ScriptRule {
                    needle: needle.to_string(),
                    replies: VecDeque::from([reply]),
                }),
            }
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_matching(&self, needle: &str) -> usize {
        self.prompts().iter().filter(|p| p.contains(needle)).count()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        let Some(rule) = rules.iter_mut().find(|r| prompt.contains(&r.needle)) else {
            return Err(GenerationError::Provider("no scripted reply".to_string()));
        };
        if rule.replies.len() > 1 {
            rule.replies
                .pop_front()
                .unwrap_or_else(|| Err(GenerationError::Provider("script exhausted".to_string())))
        } else {
            rule.replies
                .front()
                .cloned()
                .unwrap_or_else(|| Err(GenerationError::Provider("script exhausted".to_string())))
        }
    }
}

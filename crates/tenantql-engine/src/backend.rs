//! Generation backend seam
//!
//! The backend is an oracle: prompt in, text out, no semantic guarantee.
//! Everything it returns is parsed and validated before use.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::GenerationPolicy;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Generation provider error: {0}")]
    Provider(String),

    #[error("Generation response unusable: {0}")]
    Unparseable(String),
}

impl GenerationError {
    /// Timeout and provider failures mean the backend itself was unavailable
    pub fn is_unavailable(&self) -> bool {
        matches!(self, GenerationError::Timeout(_) | GenerationError::Provider(_))
    }
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Backend plus the timeout and retry bounds every caller must respect
#[derive(Clone)]
pub struct GenerationClient {
    backend: Arc<dyn GenerationBackend>,
    policy: GenerationPolicy,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn GenerationBackend>, policy: GenerationPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> &GenerationPolicy {
        &self.policy
    }

    /// One call, cancelled after the policy timeout
    pub async fn generate_once(&self, prompt: &str) -> Result<String, GenerationError> {
        let timeout = self.policy.timeout();
        match tokio::time::timeout(timeout, self.backend.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(timeout)),
        }
    }

    /// Call and parse, retrying up to `max_attempts` times. Unavailable
    /// backends and unparseable replies both consume an attempt.
    pub async fn generate_parsed<T, F>(&self, prompt: &str, parse: F) -> Result<T, GenerationError>
    where
        F: Fn(&str) -> Result<T, String> + Send,
    {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = GenerationError::Provider("no attempt made".to_string());

        for attempt in 1..=attempts {
            let outcome = match self.generate_once(prompt).await {
                Ok(text) => parse(&text).map_err(GenerationError::Unparseable),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(attempt, max_attempts = attempts, error = %e, "Generation attempt failed");
                    last_error = e;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.policy.backoff()).await;
            }
        }
        Err(last_error)
    }
}

/// Pull the JSON object out of a reply that may wrap it in prose or a code fence
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Body of the first fenced block tagged `lang` (or untagged)
pub fn extract_fenced<'a>(text: &'a str, lang: &str) -> Option<&'a str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    let body_start = after.find('\n')?;
    let tag = after[..body_start].trim();
    if !tag.is_empty() && !tag.eq_ignore_ascii_case(lang) {
        return None;
    }
    let body = &after[body_start + 1..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;

    fn policy(attempts: u32) -> GenerationPolicy {
        GenerationPolicy {
            timeout_secs: 1,
            max_attempts: attempts,
            backoff_ms: 1,
        }
    }

    #[test]
    fn test_extract_json() {
        assert_eq!(extract_json("Sure:\n```json\n{\"a\": {\"b\": 1}}\n```"), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_extract_fenced() {
        let text = "Here you go\n```sql\nSELECT 1\n```\nthanks";
        assert_eq!(extract_fenced(text, "sql"), Some("SELECT 1"));
        assert_eq!(extract_fenced("```python\nprint()\n```", "sql"), None);
        assert_eq!(extract_fenced("```\nSELECT 2\n```", "sql"), Some("SELECT 2"));
    }

    #[tokio::test]
    async fn test_scripted_replies_in_order_then_repeat() {
        let backend = ScriptedBackend::new().reply("ping", "one").reply("ping", "two");
        assert_eq!(backend.generate("ping 1").await.unwrap(), "one");
        assert_eq!(backend.generate("ping 2").await.unwrap(), "two");
        assert_eq!(backend.generate("ping 3").await.unwrap(), "two");
        assert!(backend.generate("other").await.is_err());
        assert_eq!(backend.calls(), 4);
        assert_eq!(backend.calls_matching("ping"), 3);
    }

    #[tokio::test]
    async fn test_generate_parsed_retries_unparseable() {
        let backend = Arc::new(ScriptedBackend::new().reply("q", "garbage").reply("q", "42"));
        let client = GenerationClient::new(backend.clone(), policy(2));
        let value = client
            .generate_parsed("q", |text| text.trim().parse::<u32>().map_err(|e| e.to_string()))
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_generate_parsed_gives_up_after_bound() {
        let backend = Arc::new(
            ScriptedBackend::new().fail("q", GenerationError::Provider("503".to_string())),
        );
        let client = GenerationClient::new(backend.clone(), policy(3));
        let result = client.generate_parsed("q", |t| Ok(t.to_string())).await;
        assert_eq!(result, Err(GenerationError::Provider("503".to_string())));
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_timeout() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .reply("q", "late")
                .with_delay(Duration::from_secs(5)),
        );
        let client = GenerationClient::new(backend, policy(1));
        let result = client.generate_once("q").await;
        assert!(matches!(result, Err(GenerationError::Timeout(_))));
        assert!(result.unwrap_err().is_unavailable());
    }
}

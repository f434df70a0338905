//! Scripted mock provider for tests and keyless local runs.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use crate::provider::{LlmError, LlmProvider, LlmRequest, LlmResponse};

/// Cycles through canned responses; with an empty script it echoes a
/// refusal marker so misconfigured runs fail loudly in tests.
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    responses: Vec<String>,
    index: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self { name: "mock".to_string(), responses, index: AtomicUsize::new(0) }
    }

    pub fn constant(response: &str) -> Self {
        Self::new(vec![response.to_string()])
    }

    /// Number of completions served so far.
    pub fn calls(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        request.validate()?;
        let start = Instant::now();
        let idx = self.index.fetch_add(1, Ordering::Relaxed);
        let content = if self.responses.is_empty() {
            "mock provider has no scripted response".to_string()
        } else {
            self.responses[idx % self.responses.len()].clone()
        };
        Ok(LlmResponse {
            content,
            model: self.name.clone(),
            tokens_used: Some((request.prompt.len() / 4) as u32),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cycles_through_script() {
        let mock = MockProvider::new(vec!["one".into(), "two".into()]);
        let request = LlmRequest::for_role("s", "p");
        assert_eq!(mock.complete(request.clone()).await.unwrap().content, "one");
        assert_eq!(mock.complete(request.clone()).await.unwrap().content, "two");
        assert_eq!(mock.complete(request).await.unwrap().content, "one");
        assert_eq!(mock.calls(), 3);
    }
}

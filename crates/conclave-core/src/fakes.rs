//! Deterministic in-process [`TextGenerator`] for tests and offline demos.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::provider::{GenerationRequest, ProviderError, TextGenerator};

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(ProviderError),
    Panic(String),
}

#[derive(Debug, Clone)]
struct Rule {
    needle: String,
    reply: Reply,
    delay: Option<Duration>,
}

/// Responds according to substring rules over the request's system prompt and
/// messages. The first matching rule wins; otherwise the default reply is used.
#[derive(Debug)]
pub struct ScriptedGenerator {
    default_reply: String,
    rules: Vec<Rule>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            default_reply: default_reply.into(),
            rules: Vec::new(),
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `text` when `needle` appears anywhere in the request.
    pub fn respond_when(mut self, needle: impl Into<String>, text: impl Into<String>) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            reply: Reply::Text(text.into()),
            delay: None,
        });
        self
    }

    /// Like [`respond_when`](Self::respond_when), but sleep for `delay` first.
    /// Overrides [`with_delay`](Self::with_delay) for matching requests.
    pub fn respond_after(
        mut self,
        needle: impl Into<String>,
        text: impl Into<String>,
        delay: Duration,
    ) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            reply: Reply::Text(text.into()),
            delay: Some(delay),
        });
        self
    }

    /// Fail with `error` when `needle` appears anywhere in the request.
    pub fn fail_when(mut self, needle: impl Into<String>, error: ProviderError) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            reply: Reply::Fail(error),
            delay: None,
        });
        self
    }

    /// Panic when `needle` appears. Exercises panic isolation in callers.
    pub fn panic_when(mut self, needle: impl Into<String>) -> Self {
        let needle = needle.into();
        self.rules.push(Rule {
            reply: Reply::Panic(format!("scripted panic on {needle}")),
            needle,
            delay: None,
        });
        self
    }

    /// Sleep before every reply (pairs with `tokio::time::pause`).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `generate` calls received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Snapshot of every request received, in arrival order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn reply_for(&self, request: &GenerationRequest) -> (Reply, Option<Duration>) {
        let haystack = std::iter::once(request.system_prompt.as_str())
            .chain(request.messages.iter().map(|m| m.content.as_str()))
            .collect::<Vec<_>>()
            .join("\n");
        self.rules
            .iter()
            .find(|rule| haystack.contains(&rule.needle))
            .map(|rule| (rule.reply.clone(), rule.delay.or(self.delay)))
            .unwrap_or_else(|| (Reply::Text(self.default_reply.clone()), self.delay))
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (reply, delay) = self.reply_for(&request);
        if let Ok(mut guard) = self.requests.lock() {
            guard.push(request);
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Fail(err) => Err(err),
            Reply::Panic(msg) => panic!("{msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_matching_rule_wins() {
        let generator = ScriptedGenerator::new("default")
            .respond_when("alpha", "first")
            .respond_when("alpha beta", "second");
        let text = generator
            .generate(GenerationRequest::new("sys", "alpha beta"))
            .await
            .unwrap();
        assert_eq!(text, "first");
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_rule_matches_system_prompt() {
        let generator = ScriptedGenerator::new("default")
            .fail_when("You are a critic", ProviderError::Quota("none left".into()));
        let err = generator
            .generate(GenerationRequest::new("You are a critic.", "review"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Quota(_)));
        assert_eq!(generator.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rule_delay_overrides_global_delay() {
        let generator = ScriptedGenerator::new("slow")
            .with_delay(Duration::from_secs(10))
            .respond_after("hurry", "fast", Duration::from_secs(1));
        let start = tokio::time::Instant::now();
        let text = generator
            .generate(GenerationRequest::new("sys", "hurry up"))
            .await
            .unwrap();
        assert_eq!(text, "fast");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_default_reply() {
        let generator = ScriptedGenerator::new("fallback");
        let text = generator
            .generate(GenerationRequest::new("sys", "anything"))
            .await
            .unwrap();
        assert_eq!(text, "fallback");
    }
}

//! Shared test doubles for the completion client.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use muninn::{
    ChatMessage, ClientConfig, Completion, CompletionClient, CompletionRequest, Connector,
    MuninnError, Result, RetryConfig, Transport,
};

/// Transport that replays a script of outcomes, then echoes.
///
/// Once the script runs out every call succeeds with `"echo: <last message>"`.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<Completion>>>,
    delay: Duration,
    hang: bool,
    calls: AtomicU32,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<Completion>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            delay: Duration::ZERO,
            hang: false,
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with the echo.
    pub fn echo() -> Self {
        Self::new(Vec::new())
    }

    /// Every call answers `text`.
    pub fn always(text: &str) -> Self {
        Self::new((0..64).map(|_| Ok(Completion::new(text, "test-model"))).collect())
    }

    /// Never answers.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::echo()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request sent so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &CompletionRequest) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if self.hang {
            std::future::pending::<()>().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            let last = request
                .messages()
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(Completion::new(format!("echo: {last}"), "test-model"))
        })
    }
}

/// Connector handing out one shared [`ScriptedTransport`].
pub struct StubConnector {
    pub transport: Arc<ScriptedTransport>,
    connects: AtomicU32,
}

impl StubConnector {
    pub fn new(transport: ScriptedTransport) -> Arc<Self> {
        Arc::new(Self {
            transport: Arc::new(transport),
            connects: AtomicU32::new(0),
        })
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> u32 {
        self.transport.call_count()
    }
}

impl Connector for StubConnector {
    fn connect(&self) -> Result<Arc<dyn Transport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let transport: Arc<dyn Transport> = self.transport.clone();
        Ok(transport)
    }
}

/// Client config with millisecond backoff so retry tests stay fast.
pub fn fast_config() -> ClientConfig {
    ClientConfig::new("sk-test", "m").retry(
        RetryConfig::new()
            .base_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(10)),
    )
}

pub fn client_with(
    config: ClientConfig,
    transport: ScriptedTransport,
) -> (CompletionClient, Arc<StubConnector>) {
    let connector = StubConnector::new(transport);
    let client = CompletionClient::with_connector(config, connector.clone());
    (client, connector)
}

/// The canonical `Hello` request.
pub fn hello_request() -> CompletionRequest {
    CompletionRequest::new("m", vec![ChatMessage::user("Hello")])
        .temperature(0.7)
        .max_tokens(500)
}

pub fn server_error() -> Result<Completion> {
    Err(MuninnError::api(500, "internal server error"))
}

pub fn ok(text: &str) -> Result<Completion> {
    Ok(Completion::new(text, "test-model"))
}

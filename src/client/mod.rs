//! Completion client.
//!
//! [`CompletionClient`] is the single entry point for model completions. It
//! owns the response cache and the in-flight registry outright; nothing else
//! in the crate reads or mutates either.
//!
//! Each call to [`CompletionClient::complete`] goes through, in order:
//!
//! 1. request validation (never retried, no network)
//! 2. the started check
//! 3. fingerprinting
//! 4. a cache lookup, when caching is on for this call
//! 5. joining an identical request already in flight
//! 6. registering a new unit of work: a spawned task that runs the
//!    retry-wrapped transport call and writes the cache on success
//!
//! A unit of work unregisters itself when it finishes, so concurrent
//! identical requests make exactly one upstream call and every caller gets
//! a clone of the same outcome. If the work a caller joined was cancelled
//! by [`CompletionClient::close`], the caller drops the stale entry and
//! tries to register fresh work, which fails with
//! [`MuninnError::NotStarted`] once the session is gone.

mod inflight;
mod retry;
mod transport;

pub use retry::{RetryConfig, should_retry};
pub use transport::{
    Completion, Connector, DEFAULT_BASE_URL, DEFAULT_USER_AGENT, HttpConnector, HttpTransport,
    Transport,
};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::cache::{CacheConfig, ResponseCache};
use crate::fingerprint::Fingerprint;
use crate::telemetry;
use crate::types::{ChatMessage, CompletionRequest};
use crate::{MuninnError, Result};

use inflight::{InFlightRegistry, Outcome, Registration, Slot};
use retry::with_retry;

/// Immutable client configuration.
///
/// ```rust
/// # use muninn::{CacheConfig, ClientConfig, RetryConfig};
/// # use std::time::Duration;
/// let config = ClientConfig::new("sk-or-...", "openai/gpt-4o-mini")
///     .timeout(Duration::from_secs(30))
///     .cache(CacheConfig::new().ttl(Duration::from_secs(600)))
///     .retry(RetryConfig::new().max_attempts(3));
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    /// Upstream base URL; `/chat/completions` is appended.
    pub base_url: String,
    /// Model used by [`CompletionClient::complete_messages`].
    pub model: String,
    /// Per-HTTP-call timeout. Default: 30s.
    pub timeout: Duration,
    pub user_agent: String,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

struct Session {
    transport: Arc<dyn Transport>,
    sweeper: Option<JoinHandle<()>>,
}

/// Deduplicating, caching, retrying completion client.
///
/// Build it once and share it (by reference or `Arc`) with every consumer.
/// Call [`start`](Self::start) before issuing requests and
/// [`close`](Self::close) on shutdown.
pub struct CompletionClient {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    cache: Arc<ResponseCache>,
    inflight: Arc<InFlightRegistry>,
    session: Mutex<Option<Session>>,
}

impl CompletionClient {
    /// Client talking to the configured HTTP endpoint.
    pub fn new(config: ClientConfig) -> Self {
        let connector = HttpConnector::new(
            config.api_key.clone(),
            config.base_url.clone(),
            config.timeout,
            config.user_agent.clone(),
        );
        Self::with_connector(config, Arc::new(connector))
    }

    /// Client whose sessions come from `connector`.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let cache = Arc::new(ResponseCache::new(&config.cache));
        Self {
            config,
            connector,
            cache,
            inflight: Arc::new(InFlightRegistry::new()),
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_session(&self) -> Option<Session> {
        self.lock_session().take()
    }


    /// Open the network session and start the cache sweep.
    ///
    /// Idempotent. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut session = self.lock_session();
        if session.is_some() {
            return Ok(());
        }

        let transport = self.connector.connect()?;
        let sweeper = self.config.cache.enabled.then(|| {
            spawn_sweeper(
                Arc::clone(&self.cache),
                self.config.cache.effective_sweep_interval(),
            )
        });
        *session = Some(Session { transport, sweeper });

        info!(
            model = %self.config.model,
            timeout_s = self.config.timeout.as_secs(),
            caching = self.config.cache.enabled,
            "completion client started"
        );
        Ok(())
    }

    /// Stop the sweep, cancel in-flight work, and release the session.
    ///
    /// Safe to call repeatedly, and before [`start`](Self::start).
    pub async fn close(&self) {
        let Some(Session { transport, sweeper }) = self.take_session() else {
            return;
        };

        let cancelled = self.inflight.abort_all();
        if let Some(sweeper) = sweeper {
            sweeper.abort();
            let _ = sweeper.await;
        }
        drop(transport);

        info!(cancelled, "completion client closed");
    }

    pub fn is_started(&self) -> bool {
        self.lock_session().is_some()
    }

    /// Number of stored cache entries.
    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    /// Number of distinct requests currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.inflight.len()
    }

    /// Complete `messages` with the configured model.
    pub async fn complete_messages(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: u32,
        use_cache: bool,
    ) -> Result<String> {
        let request = CompletionRequest::new(self.config.model.clone(), messages)
            .temperature(temperature)
            .max_tokens(max_tokens);
        self.complete(request, use_cache).await
    }

    /// Complete a request.
    ///
    /// With `use_cache` false the cache is not consulted, but a successful
    /// result is still stored when caching is enabled.
    pub async fn complete(&self, request: CompletionRequest, use_cache: bool) -> Result<String> {
        request.validate()?;
        if !self.is_started() {
            return Err(MuninnError::NotStarted);
        }

        let fingerprint = Fingerprint::of(&request)?;

        if use_cache
            && self.config.cache.enabled
            && let Some(hit) = self.cache.get(&fingerprint)
        {
            debug!(fingerprint = %fingerprint.short(), "using cached response");
            metrics::counter!(telemetry::COMPLETIONS_TOTAL, "source" => "cache").increment(1);
            return Ok(hit.text);
        }

        let request = Arc::new(request);
        loop {
            let slot = self.join_or_register(fingerprint, &request)?;

            match slot {
                Slot::Joined { generation, work } => {
                    debug!(fingerprint = %fingerprint.short(), "waiting for duplicate request");
                    match work.await {
                        Err(MuninnError::Cancelled) => {
                            self.inflight.remove(&fingerprint, generation);
                            debug!(
                                fingerprint = %fingerprint.short(),
                                "joined request was cancelled, issuing a fresh one"
                            );
                        }
                        outcome => {
                            if outcome.is_ok() {
                                metrics::counter!(telemetry::COMPLETIONS_TOTAL, "source" => "coalesced")
                                    .increment(1);
                            }
                            return outcome;
                        }
                    }
                }
                Slot::Registered { work } => {
                    let outcome = work.await;
                    if outcome.is_ok() {
                        metrics::counter!(telemetry::COMPLETIONS_TOTAL, "source" => "upstream")
                            .increment(1);
                    }
                    return outcome;
                }
            }
        }
    }

    /// Join or register work while holding the session lock.
    ///
    /// `close` takes the session under the same lock before it aborts the
    /// registry, so no work can be registered once the session is gone.
    fn join_or_register(
        &self,
        fingerprint: Fingerprint,
        request: &Arc<CompletionRequest>,
    ) -> Result<Slot> {
        let session = self.lock_session();
        let transport = session
            .as_ref()
            .map(|s| Arc::clone(&s.transport))
            .ok_or(MuninnError::NotStarted)?;
        let slot = self.inflight.join_or_register(fingerprint, |generation| {
            self.spawn_work(transport, Arc::clone(request), fingerprint, generation)
        });
        drop(session);
        Ok(slot)
    }

    fn spawn_work(
        &self,
        transport: Arc<dyn Transport>,
        request: Arc<CompletionRequest>,
        fingerprint: Fingerprint,
        generation: u64,
    ) -> JoinHandle<Outcome> {
        let registry = Arc::clone(&self.inflight);
        let cache = self.config.cache.enabled.then(|| Arc::clone(&self.cache));
        let retry = self.config.retry.clone();

        tokio::spawn(async move {
            let registration = Registration::new(registry, fingerprint, generation);
            let outcome = run_unit(transport, &retry, &request, fingerprint, cache).await;
            drop(registration);
            outcome
        })
    }
}

impl Drop for CompletionClient {
    fn drop(&mut self) {
        if let Some(Session {
            sweeper: Some(sweeper),
            ..
        }) = self.take_session()
        {
            sweeper.abort();
        }
        self.inflight.abort_all();
    }
}

async fn run_unit(
    transport: Arc<dyn Transport>,
    retry: &RetryConfig,
    request: &CompletionRequest,
    fingerprint: Fingerprint,
    cache: Option<Arc<ResponseCache>>,
) -> Outcome {
    let result = with_retry(retry, request.model(), |_| transport.send(request)).await;

    match result {
        Ok(completion) => {
            if let Some(cache) = cache {
                let model = if completion.model.is_empty() {
                    request.model()
                } else {
                    completion.model.as_str()
                };
                cache.insert(
                    fingerprint,
                    completion.text.clone(),
                    model,
                    completion.approx_tokens(),
                );
            }
            Ok(completion.text)
        }
        Err(e) => {
            error!(
                fingerprint = %fingerprint.short(),
                model = request.model(),
                error = %e,
                "completion failed"
            );
            Err(e)
        }
    }
}

fn spawn_sweeper(cache: Arc<ResponseCache>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            cache.sweep_expired();
        }
    })
}

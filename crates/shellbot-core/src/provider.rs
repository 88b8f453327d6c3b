use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::BotError;

/// An endpoint ready for use, with its key already resolved.
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    pub name: String,
    pub api_base: String,
    pub model: String,
    pub api_key: Option<String>,
    pub priority: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Failure classification that decides whether the next provider is tried.
#[derive(Debug, Clone)]
pub enum RequestError {
    /// Timeout, network failure or 5xx. The next provider is tried.
    Transient(String),
    /// Auth or malformed request. Trying elsewhere would not help.
    Permanent(String),
}

#[derive(Debug, Default)]
struct Health {
    consecutive_failures: u32,
}

/// Local and cloud endpoints ordered by priority, with failure tracking.
pub struct ProviderChain {
    providers: Vec<ResolvedProvider>,
    health: RwLock<HashMap<String, Health>>,
}

impl ProviderChain {
    pub fn new(mut providers: Vec<ResolvedProvider>) -> Self {
        providers.sort_by_key(|p| p.priority);
        let health = providers
            .iter()
            .map(|p| (p.name.clone(), Health::default()))
            .collect();
        Self {
            providers,
            health: RwLock::new(health),
        }
    }

    /// Build the chain from `[[providers]]`, or from the single `[provider]`
    /// section when no explicit chain is configured.
    pub fn from_config(config: &AppConfig) -> Result<Self, BotError> {
        let defaults = &config.provider;
        let providers: Vec<ResolvedProvider> = if config.providers.is_empty() {
            vec![ResolvedProvider {
                name: "default".to_string(),
                api_base: defaults.api_base.clone(),
                model: defaults.model.clone(),
                api_key: defaults.api_key.clone(),
                priority: 1,
                timeout_secs: defaults.timeout_secs,
                max_retries: 2,
                max_tokens: defaults.max_tokens,
                temperature: defaults.temperature,
            }]
        } else {
            config
                .providers
                .iter()
                .map(|entry| ResolvedProvider {
                    name: entry.name.clone(),
                    api_base: entry.api_base.clone(),
                    model: entry.model.clone(),
                    api_key: entry.api_key.clone().or_else(|| {
                        entry
                            .api_key_env
                            .as_ref()
                            .and_then(|var| std::env::var(var).ok())
                    }),
                    priority: entry.priority,
                    timeout_secs: entry.timeout_secs,
                    max_retries: entry.max_retries,
                    max_tokens: defaults.max_tokens,
                    temperature: defaults.temperature,
                })
                .collect()
        };

        if providers.is_empty() {
            return Err(BotError::Config("No providers configured".into()));
        }
        Ok(Self::new(providers))
    }

    /// Providers still within their failure budget, best first.
    pub fn available(&self) -> Result<Vec<ResolvedProvider>, BotError> {
        let health = self
            .health
            .read()
            .map_err(|e| BotError::Provider(format!("Health lock poisoned: {}", e)))?;

        Ok(self
            .providers
            .iter()
            .filter(|p| {
                health
                    .get(&p.name)
                    .map(|h| h.consecutive_failures < p.max_retries)
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    pub fn record_success(&self, name: &str) {
        if let Ok(mut health) = self.health.write() {
            if let Some(h) = health.get_mut(name) {
                h.consecutive_failures = 0;
            }
        }
    }

    pub fn record_failure(&self, name: &str) {
        if let Ok(mut health) = self.health.write() {
            if let Some(h) = health.get_mut(name) {
                h.consecutive_failures += 1;
            }
        }
    }

    /// Run `make_request` against each available provider in turn until one
    /// succeeds or a permanent error is hit.
    pub async fn request_with_failover<F, Fut, T>(&self, make_request: F) -> Result<T, BotError>
    where
        F: Fn(ResolvedProvider) -> Fut,
        Fut: std::future::Future<Output = Result<T, RequestError>>,
    {
        // Read lock released here before making requests.
        let mut candidates = self.available()?;
        if candidates.is_empty() {
            // A long-running session must recover once the endpoints come back.
            warn!("All providers exceeded their failure budget; retrying the full chain");
            candidates = self.providers.clone();
        }

        let mut errors = Vec::new();
        for provider in candidates {
            debug!("Trying provider: {}", provider.name);
            let name = provider.name.clone();
            match make_request(provider).await {
                Ok(value) => {
                    self.record_success(&name);
                    return Ok(value);
                }
                Err(RequestError::Transient(msg)) => {
                    warn!("Provider {} transient error: {}", name, msg);
                    self.record_failure(&name);
                    errors.push(format!("{}: {}", name, msg));
                }
                Err(RequestError::Permanent(msg)) => {
                    warn!("Provider {} permanent error: {}", name, msg);
                    self.record_failure(&name);
                    return Err(BotError::Provider(format!(
                        "Provider {} permanent error: {}",
                        name, msg
                    )));
                }
            }
        }

        Err(BotError::Provider(format!(
            "All providers failed: {}",
            errors.join("; ")
        )))
    }

    pub fn providers(&self) -> &[ResolvedProvider] {
        &self.providers
    }
}

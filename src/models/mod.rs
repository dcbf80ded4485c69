//! Model lifecycle management.
//!
//! Tracks which models are loaded, keeps them warm with periodic provider
//! pings, evicts idle ones, and caches provider listings behind a TTL.

pub mod database;
pub mod router;

pub use database::{ModelDbEntry, lookup};
pub use router::{ModelRouter, RouterConfig, RoutingProfile};

use crate::clock::SharedClock;
use crate::provider::{ModelDetails, ModelInfo, ModelProvider, ProviderError, PullProgress};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct KeepAliveConfig {
    pub enabled: bool,
    /// Idle time after which an unpinned model is evicted.
    pub keep_alive_timeout: Duration,
    /// Models never evicted by idleness.
    pub keep_alive_models: Vec<String>,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keep_alive_timeout: Duration::from_secs(300),
            keep_alive_models: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelStatus {
    pub loaded: bool,
    pub last_used: Option<DateTime<Utc>>,
}

struct LoadedModel {
    last_used: DateTime<Utc>,
    timer: Option<CancellationToken>,
}

struct ListingCache {
    models: Vec<ModelInfo>,
    fetched_at: DateTime<Utc>,
}

pub struct ModelManager {
    provider: Arc<dyn ModelProvider>,
    clock: SharedClock,
    keep_alive: KeepAliveConfig,
    cache_ttl: chrono::Duration,
    loaded: StdMutex<HashMap<String, LoadedModel>>,
    cache: Mutex<Option<ListingCache>>,
    shutdown: CancellationToken,
}

impl ModelManager {
    #[must_use]
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        keep_alive: KeepAliveConfig,
        cache_ttl: Duration,
        clock: SharedClock,
    ) -> Self {
        Self {
            provider,
            clock,
            keep_alive,
            cache_ttl: chrono::Duration::from_std(cache_ttl)
                .unwrap_or_else(|_| chrono::Duration::MAX),
            loaded: StdMutex::new(HashMap::new()),
            cache: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// List available models, serving a cached listing while it is fresh.
    /// Refreshes are serialised under the cache lock so concurrent callers
    /// never issue duplicate provider requests.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref()
            && self.clock.now() - cached.fetched_at < self.cache_ttl
        {
            return Ok(cached.models.clone());
        }

        let models = self.provider.list_models().await?;
        *cache = Some(ListingCache {
            models: models.clone(),
            fetched_at: self.clock.now(),
        });
        Ok(models)
    }

    /// Pull a model blob, forwarding progress. Cancellation fails the call
    /// with [`ProviderError::Cancelled`] and leaves the listing cache and
    /// loaded set untouched.
    pub async fn pull_model(
        &self,
        name: &str,
        on_progress: &(dyn Fn(PullProgress) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        tokio::select! {
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = self.provider.pull_model(name, on_progress) => result?,
        }
        self.invalidate_cache().await;
        Ok(())
    }

    /// Delete a model blob. A loaded model is unloaded first (best effort;
    /// the delete outcome is what gets reported).
    pub async fn delete_model(&self, name: &str) -> Result<(), ProviderError> {
        let was_loaded = {
            let mut loaded = self.lock_loaded();
            match loaded.remove(name) {
                Some(model) => {
                    if let Some(timer) = model.timer {
                        timer.cancel();
                    }
                    true
                }
                None => false,
            }
        };

        if was_loaded && let Err(e) = self.provider.unload_model(name).await {
            tracing::warn!("Unload before delete failed for {name}: {e}");
        }

        self.provider.delete_model(name).await?;
        self.invalidate_cache().await;
        Ok(())
    }

    pub async fn show_model(&self, name: &str) -> Result<ModelDetails, ProviderError> {
        self.provider.show_model(name).await
    }

    /// Load a model and keep it warm. No-op when keep-alive is disabled.
    /// Re-loading refreshes `last_used` and re-arms the ping timer.
    pub async fn keep_model_loaded(&self, name: &str) -> Result<(), ProviderError> {
        if !self.keep_alive.enabled {
            return Ok(());
        }

        self.provider.keep_model_loaded(name).await?;

        let mut loaded = self.lock_loaded();
        if let Some(existing) = loaded.get(name)
            && let Some(timer) = &existing.timer
        {
            timer.cancel();
        }
        let timer = (!self.shutdown.is_cancelled()).then(|| self.spawn_ping_timer(name));
        loaded.insert(
            name.to_string(),
            LoadedModel {
                last_used: self.clock.now(),
                timer,
            },
        );
        Ok(())
    }

    pub async fn unload_model(&self, name: &str) -> Result<(), ProviderError> {
        {
            let mut loaded = self.lock_loaded();
            if let Some(model) = loaded.remove(name)
                && let Some(timer) = model.timer
            {
                timer.cancel();
            }
        }
        self.provider.unload_model(name).await
    }

    /// Evict idle models, then return the loaded set (sorted).
    ///
    /// Models listed in `keep_alive_models` are never evicted. Eviction
    /// unloads are best effort: provider failures are logged, not surfaced.
    pub async fn get_loaded_models(&self) -> Vec<String> {
        let now = self.clock.now();
        let timeout = chrono::Duration::from_std(self.keep_alive.keep_alive_timeout)
            .unwrap_or_else(|_| chrono::Duration::MAX);

        let mut evicted = Vec::new();
        let mut names: Vec<String>;
        {
            let mut loaded = self.lock_loaded();
            loaded.retain(|name, model| {
                let pinned = self.keep_alive.keep_alive_models.iter().any(|m| m == name);
                if !pinned && now - model.last_used >= timeout {
                    if let Some(timer) = &model.timer {
                        timer.cancel();
                    }
                    evicted.push(name.clone());
                    false
                } else {
                    true
                }
            });
            names = loaded.keys().cloned().collect();
        }

        for name in evicted {
            if let Err(e) = self.provider.unload_model(&name).await {
                tracing::warn!("Idle eviction unload failed for {name}: {e}");
            }
        }

        names.sort();
        names
    }

    pub fn get_model_status(&self, name: &str) -> ModelStatus {
        let loaded = self.lock_loaded();
        match loaded.get(name) {
            Some(model) => ModelStatus {
                loaded: true,
                last_used: Some(model.last_used),
            },
            None => ModelStatus {
                loaded: false,
                last_used: None,
            },
        }
    }

    /// Stop all keep-alive timers. Idempotent.
    pub fn dispose(&self) {
        self.shutdown.cancel();
    }

    fn lock_loaded(&self) -> std::sync::MutexGuard<'_, HashMap<String, LoadedModel>> {
        self.loaded.lock().expect("loaded set mutex poisoned")
    }

    async fn invalidate_cache(&self) {
        *self.cache.lock().await = None;
    }

    /// Ping loop at half the idle timeout, jittered ±10%. Pings keep the
    /// provider-side model warm but do not count as usage.
    fn spawn_ping_timer(&self, name: &str) -> CancellationToken {
        let token = self.shutdown.child_token();
        let task_token = token.clone();
        let provider = Arc::clone(&self.provider);
        let name = name.to_string();
        let half_timeout = self.keep_alive.keep_alive_timeout / 2;

        tokio::spawn(async move {
            loop {
                let jitter = 0.9 + rand::random::<f64>() * 0.2;
                let period = half_timeout.mul_f64(jitter);
                tokio::select! {
                    () = tokio::time::sleep(period) => {
                        if let Err(e) = provider.keep_model_loaded(&name).await {
                            tracing::warn!("Keep-alive ping failed for {name}: {e}");
                        }
                    }
                    () = task_token.cancelled() => break,
                }
            }
        });
        token
    }
}

impl Drop for ModelManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::clock::ManualClock;
    use crate::provider::ModelCapabilities;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockProvider {
        models: StdMutex<Vec<ModelInfo>>,
        list_calls: AtomicUsize,
        keep_alive_calls: StdMutex<Vec<String>>,
        unloaded: StdMutex<Vec<String>>,
        deleted: StdMutex<Vec<String>>,
        hang_pulls: bool,
    }

    fn mock_model(name: &str) -> ModelInfo {
        ModelInfo {
            name: name.to_string(),
            size: 1024,
            modified_at: Utc::now(),
            family: "llama".to_string(),
            context_window: 8_192,
            capabilities: ModelCapabilities::default(),
        }
    }

    #[async_trait::async_trait]
    impl ModelProvider for MockProvider {
        async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.models.lock().unwrap().clone())
        }

        async fn pull_model(
            &self,
            name: &str,
            on_progress: &(dyn Fn(PullProgress) + Send + Sync),
        ) -> Result<(), ProviderError> {
            if self.hang_pulls {
                std::future::pending::<()>().await;
            }
            on_progress(PullProgress {
                status: "downloading".to_string(),
                completed: 1,
                total: 1,
            });
            self.models.lock().unwrap().push(mock_model(name));
            Ok(())
        }

        async fn delete_model(&self, name: &str) -> Result<(), ProviderError> {
            self.deleted.lock().unwrap().push(name.to_string());
            self.models.lock().unwrap().retain(|m| m.name != name);
            Ok(())
        }

        async fn show_model(&self, name: &str) -> Result<ModelDetails, ProviderError> {
            self.models
                .lock()
                .unwrap()
                .iter()
                .find(|m| m.name == name)
                .map(|info| ModelDetails {
                    info: info.clone(),
                    parameters: None,
                    template: None,
                })
                .ok_or_else(|| ProviderError::NotFound(name.to_string()))
        }

        async fn keep_model_loaded(&self, name: &str) -> Result<(), ProviderError> {
            self.keep_alive_calls.lock().unwrap().push(name.to_string());
            Ok(())
        }

        async fn unload_model(&self, name: &str) -> Result<(), ProviderError> {
            self.unloaded.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    fn manager_with(
        provider: Arc<MockProvider>,
        keep_alive: KeepAliveConfig,
        clock: Arc<ManualClock>,
    ) -> ModelManager {
        // Capture best-effort warnings (eviction, ping failures) in test output
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        ModelManager::new(provider, keep_alive, Duration::from_secs(3600), clock)
    }

    #[tokio::test]
    async fn test_listing_is_cached_within_ttl() {
        let provider = Arc::new(MockProvider::default());
        provider.models.lock().unwrap().push(mock_model("llama3.1:8b"));
        let clock = Arc::new(ManualClock::starting_now());
        let manager = manager_with(provider.clone(), KeepAliveConfig::default(), clock.clone());

        manager.list_models().await.unwrap();
        manager.list_models().await.unwrap();
        assert_eq!(provider.list_calls.load(Ordering::SeqCst), 1);

        clock.advance(chrono::Duration::seconds(3601));
        manager.list_models().await.unwrap();
        assert_eq!(provider.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pull_invalidates_cache() {
        let provider = Arc::new(MockProvider::default());
        let clock = Arc::new(ManualClock::starting_now());
        let manager = manager_with(provider.clone(), KeepAliveConfig::default(), clock);

        assert!(manager.list_models().await.unwrap().is_empty());

        let cancel = CancellationToken::new();
        manager
            .pull_model("phi3:mini", &|_| {}, &cancel)
            .await
            .unwrap();

        // Cache was fresh, but the pull must still be visible
        let models = manager.list_models().await.unwrap();
        assert!(models.iter().any(|m| m.name == "phi3:mini"));
    }

    #[tokio::test]
    async fn test_pull_cancellation() {
        let provider = Arc::new(MockProvider {
            hang_pulls: true,
            ..Default::default()
        });
        let clock = Arc::new(ManualClock::starting_now());
        let manager = manager_with(provider.clone(), KeepAliveConfig::default(), clock);

        manager.list_models().await.unwrap();
        let calls_before = provider.list_calls.load(Ordering::SeqCst);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = manager
            .pull_model("phi3:mini", &|_| {}, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));

        // Cache untouched, nothing loaded
        manager.list_models().await.unwrap();
        assert_eq!(provider.list_calls.load(Ordering::SeqCst), calls_before);
        assert!(manager.get_loaded_models().await.is_empty());
    }

    #[tokio::test]
    async fn test_idle_model_is_evicted() {
        let provider = Arc::new(MockProvider::default());
        let clock = Arc::new(ManualClock::starting_now());
        let keep_alive = KeepAliveConfig {
            keep_alive_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let manager = manager_with(provider.clone(), keep_alive, clock.clone());

        manager.keep_model_loaded("m").await.unwrap();
        assert_eq!(manager.get_loaded_models().await, vec!["m".to_string()]);

        clock.advance(chrono::Duration::milliseconds(1500));
        assert!(manager.get_loaded_models().await.is_empty());
        assert_eq!(provider.unloaded.lock().unwrap().as_slice(), ["m"]);
        manager.dispose();
    }

    #[tokio::test]
    async fn test_pinned_model_survives_idleness() {
        let provider = Arc::new(MockProvider::default());
        let clock = Arc::new(ManualClock::starting_now());
        let keep_alive = KeepAliveConfig {
            keep_alive_timeout: Duration::from_secs(1),
            keep_alive_models: vec!["m".to_string()],
            ..Default::default()
        };
        let manager = manager_with(provider.clone(), keep_alive, clock.clone());

        manager.keep_model_loaded("m").await.unwrap();
        clock.advance(chrono::Duration::milliseconds(1500));
        assert_eq!(manager.get_loaded_models().await, vec!["m".to_string()]);
        assert!(provider.unloaded.lock().unwrap().is_empty());
        manager.dispose();
    }

    #[tokio::test]
    async fn test_keep_alive_disabled_is_noop() {
        let provider = Arc::new(MockProvider::default());
        let clock = Arc::new(ManualClock::starting_now());
        let keep_alive = KeepAliveConfig {
            enabled: false,
            ..Default::default()
        };
        let manager = manager_with(provider.clone(), keep_alive, clock);

        manager.keep_model_loaded("m").await.unwrap();
        assert!(manager.get_loaded_models().await.is_empty());
        assert!(provider.keep_alive_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unload_removes_model() {
        let provider = Arc::new(MockProvider::default());
        let clock = Arc::new(ManualClock::starting_now());
        let manager = manager_with(provider.clone(), KeepAliveConfig::default(), clock);

        manager.keep_model_loaded("m").await.unwrap();
        manager.unload_model("m").await.unwrap();
        assert!(manager.get_loaded_models().await.is_empty());
        assert_eq!(provider.unloaded.lock().unwrap().as_slice(), ["m"]);
        manager.dispose();
    }

    #[tokio::test]
    async fn test_delete_unloads_loaded_model_first() {
        let provider = Arc::new(MockProvider::default());
        provider.models.lock().unwrap().push(mock_model("m"));
        let clock = Arc::new(ManualClock::starting_now());
        let manager = manager_with(provider.clone(), KeepAliveConfig::default(), clock);

        manager.keep_model_loaded("m").await.unwrap();
        manager.delete_model("m").await.unwrap();

        assert_eq!(provider.unloaded.lock().unwrap().as_slice(), ["m"]);
        assert_eq!(provider.deleted.lock().unwrap().as_slice(), ["m"]);
        let status = manager.get_model_status("m");
        assert!(!status.loaded);
        manager.dispose();
    }

    #[tokio::test]
    async fn test_show_unknown_model_is_not_found() {
        let provider = Arc::new(MockProvider::default());
        let clock = Arc::new(ManualClock::starting_now());
        let manager = manager_with(provider, KeepAliveConfig::default(), clock);

        let err = manager.show_model("ghost").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn test_model_status_reports_last_used() {
        let provider = Arc::new(MockProvider::default());
        let clock = Arc::new(ManualClock::starting_now());
        let manager = manager_with(provider, KeepAliveConfig::default(), clock.clone());

        assert_eq!(
            manager.get_model_status("m"),
            ModelStatus {
                loaded: false,
                last_used: None
            }
        );

        manager.keep_model_loaded("m").await.unwrap();
        let status = manager.get_model_status("m");
        assert!(status.loaded);
        assert_eq!(status.last_used, Some(clock.now()));
        manager.dispose();
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let provider = Arc::new(MockProvider::default());
        let clock = Arc::new(ManualClock::starting_now());
        let manager = manager_with(provider, KeepAliveConfig::default(), clock);

        manager.keep_model_loaded("m").await.unwrap();
        manager.dispose();
        manager.dispose();
    }
}

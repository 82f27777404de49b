use callcoord_core::{AgentConfig, AgentStatus, CoordError, CoordResult};
use callcoord_store::{AgentUpdate, DurableStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Agent id of the fallback configuration.
pub const DEFAULT_AGENT_ID: &str = "default";

struct CachedAgent {
    config: AgentConfig,
    cached_at: Instant,
}

/// TTL-bounded read-through cache of servable agent configs.
///
/// Entries are whole values replaced under a map-wide lock, so a reader sees
/// either the previous config or the new one. Failed lookups are never cached.
pub struct AgentConfigCache {
    store: DurableStore,
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedAgent>>,
}

impl AgentConfigCache {
    /// Create a cache in front of `store` whose entries live for `ttl`.
    pub fn new(store: DurableStore, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &DurableStore {
        &self.store
    }

    /// Resolve a servable agent config.
    ///
    /// Returns `NotFound` when the agent does not exist or is not active, and
    /// `InvalidConfig` when the stored record fails validation.
    pub async fn get(&self, agent_id: &str) -> CoordResult<AgentConfig> {
        if let Some(config) = self.lookup(agent_id) {
            debug!(agent_id, "Agent config cache hit");
            return Ok(config);
        }

        let config = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| CoordError::NotFound(format!("agent {agent_id}")))?;
        if let Err(e) = config.validate() {
            warn!(agent_id, error = %e, "Stored agent config failed validation");
            return Err(e);
        }
        if !config.is_servable() {
            return Err(CoordError::NotFound(format!(
                "agent {agent_id} is {}",
                config.status.as_str()
            )));
        }

        self.insert(config.clone());
        debug!(agent_id, "Agent config cached");
        Ok(config)
    }

    /// Put a config in the cache with a fresh timestamp.
    pub fn insert(&self, config: AgentConfig) {
        self.entries.write().insert(
            config.agent_id.clone(),
            CachedAgent {
                config,
                cached_at: Instant::now(),
            },
        );
    }

    fn lookup(&self, agent_id: &str) -> Option<AgentConfig> {
        {
            let entries = self.entries.read();
            let entry = entries.get(agent_id)?;
            if entry.cached_at.elapsed() < self.ttl {
                return Some(entry.config.clone());
            }
        }
        let mut entries = self.entries.write();
        if entries
            .get(agent_id)
            .is_some_and(|e| e.cached_at.elapsed() >= self.ttl)
        {
            entries.remove(agent_id);
            debug!(agent_id, "Evicted expired agent config");
        }
        None
    }

    /// Drop one entry, or every entry when `agent_id` is `None`.
    pub fn invalidate(&self, agent_id: Option<&str>) {
        let mut entries = self.entries.write();
        match agent_id {
            Some(id) => {
                entries.remove(id);
            }
            None => entries.clear(),
        }
    }

    /// Number of cached entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    // --- Administration ---

    /// Provision a new agent.
    pub async fn create_agent(&self, config: &AgentConfig) -> CoordResult<()> {
        self.store.create_agent(config).await?;
        self.invalidate(Some(&config.agent_id));
        Ok(())
    }

    /// Apply an administrative update and drop the cached copy.
    pub async fn update_agent(&self, agent_id: &str, update: AgentUpdate) -> CoordResult<()> {
        let result = self.store.update_agent(agent_id, update).await;
        self.invalidate(Some(agent_id));
        result
    }

    /// Soft-delete: the agent stops being servable.
    pub async fn deactivate_agent(&self, agent_id: &str) -> CoordResult<()> {
        self.update_agent(agent_id, AgentUpdate::status(AgentStatus::Inactive))
            .await?;
        info!(agent_id, "Deactivated agent");
        Ok(())
    }

    /// Retire an agent permanently.
    pub async fn archive_agent(&self, agent_id: &str) -> CoordResult<()> {
        self.update_agent(agent_id, AgentUpdate::status(AgentStatus::Archived))
            .await?;
        info!(agent_id, "Archived agent");
        Ok(())
    }

    /// Servable agents, read straight from the store.
    pub async fn list_active_agents(&self, limit: usize) -> CoordResult<Vec<AgentConfig>> {
        self.store.list_active_agents(limit).await
    }
}

/// Fallback config used when the requested agent cannot be served.
pub fn default_agent_config() -> AgentConfig {
    AgentConfig::new(
        DEFAULT_AGENT_ID,
        "Default Agent",
        "You are a helpful voice assistant. Keep responses brief and conversational, \
         one or two sentences at most.",
    )
}

//! Handler abstraction layer
//!
//! A handler is a named synchronization strategy bound to one remote index
//! provider and an ordered list of resource groups. Handlers are kept in a
//! [`HandlerRegistry`] that refuses a second handler with the same identifier.

use crate::config::{Config, HandlerConfig, ModrinthConfig};
use crate::download::Downloader;
use crate::remote::{build_http_client, LookupSelectors, ModrinthClient};
use crate::sync::{GroupOutcome, GroupReport, SyncContext, SyncEngine};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// Trait for synchronization strategies
///
/// Implement this trait to add support for another remote index.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Unique identifier, also the configuration key
    fn identifier(&self) -> &str;

    /// Synchronize every resource group of this handler, in declared order
    async fn handle(&self, context: &SyncContext) -> Result<HandlerReport>;
}

/// Per-group results of one handler invocation
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerReport {
    pub identifier: String,
    pub groups: Vec<GroupReport>,
}

impl HandlerReport {
    pub fn failed_groups(&self) -> usize {
        self.groups
            .iter()
            .filter(|g| matches!(g.outcome, GroupOutcome::Failed(_)))
            .count()
    }

    pub fn updated_files(&self) -> usize {
        self.groups
            .iter()
            .map(|g| match &g.outcome {
                GroupOutcome::Updated(report) => report.updated.len(),
                _ => 0,
            })
            .sum()
    }
}

/// Identifier-keyed collection of configured handlers
///
/// Registration is serialized by a lock; [`HandlerRegistry::handlers`] hands
/// out an ordered snapshot so a sync run never touches the lock.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Mutex<Vec<Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one handler per configured entry, in configuration order
    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = Self::new();
        let http = build_http_client(config.timeout_duration())?;

        for handler_config in &config.handlers {
            let handler: Arc<dyn Handler> = match handler_config {
                HandlerConfig::Modrinth(modrinth) => {
                    Arc::new(ModrinthHandler::new(modrinth.clone(), http.clone()))
                }
            };

            if !registry.register(handler) {
                bail!(
                    "Handler '{}' is configured more than once",
                    handler_config.identifier()
                );
            }
        }

        Ok(registry)
    }

    /// Register a handler; returns false when its identifier is already taken
    pub fn register(&self, handler: Arc<dyn Handler>) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);

        if handlers
            .iter()
            .any(|existing| existing.identifier() == handler.identifier())
        {
            return false;
        }

        info!("Registered handler: {}", handler.identifier());
        handlers.push(handler);
        true
    }

    /// Snapshot of the registered handlers in registration order
    pub fn handlers(&self) -> Vec<Arc<dyn Handler>> {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Modrinth Handler Implementation
// =============================================================================

/// Keeps resource groups in sync with Modrinth
pub struct ModrinthHandler {
    config: ModrinthConfig,
    client: ModrinthClient,
    downloader: Downloader,
}

impl ModrinthHandler {
    pub const IDENTIFIER: &'static str = "modrinth";

    pub fn new(config: ModrinthConfig, http: reqwest::Client) -> Self {
        let client = ModrinthClient::new(http.clone(), config.api_url.clone(), config.hash_algorithm);
        Self {
            config,
            client,
            downloader: Downloader::new(http),
        }
    }
}

#[async_trait]
impl Handler for ModrinthHandler {
    fn identifier(&self) -> &str {
        Self::IDENTIFIER
    }

    async fn handle(&self, context: &SyncContext) -> Result<HandlerReport> {
        let engine = SyncEngine::new(
            Self::IDENTIFIER,
            context,
            &self.client,
            &self.downloader,
            self.config.hash_algorithm,
        );

        let mut groups = Vec::with_capacity(self.config.resources.len());
        for group in &self.config.resources {
            let selectors = LookupSelectors {
                loaders: group.loaders.clone(),
                game_versions: self.config.game_versions.clone(),
            };
            groups.push(engine.run(group, &selectors).await);
        }

        Ok(HandlerReport {
            identifier: Self::IDENTIFIER.to_string(),
            groups,
        })
    }
}

//! Plugin-based source registry
//!
//! Adapter crates register a factory under their source identifier; the
//! daemon then builds adapters from configuration without knowing the
//! concrete types.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use animesync_core::registry::SourceRegistry;
//!
//! let registry = SourceRegistry::new();
//! animesync_source_anilist::register(&registry);
//!
//! let adapters = registry.create_all(&config.sources)?;
//! ```

use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::model::SourceKind;
use crate::traits::{SourceAdapter, SourceAdapterFactory};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Registry of source adapter factories
///
/// Interior mutability with RwLock allows registration through a shared
/// reference.
#[derive(Default)]
pub struct SourceRegistry {
    factories: RwLock<HashMap<SourceKind, Box<dyn SourceAdapterFactory>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for `source`
    pub fn register(&self, source: SourceKind, factory: Box<dyn SourceAdapterFactory>) {
        let mut factories = self.factories.write().unwrap_or_else(|e| e.into_inner());
        factories.insert(source, factory);
    }

    /// Build one adapter
    pub fn create_adapter(&self, config: &SourceConfig) -> Result<Arc<dyn SourceAdapter>> {
        let factories = self.factories.read().unwrap_or_else(|e| e.into_inner());

        let factory = factories.get(&config.source).ok_or_else(|| {
            Error::config(format!("No adapter registered for source: {}", config.source))
        })?;

        let adapter = factory.create(config)?;
        if adapter.source() != config.source {
            return Err(Error::config(format!(
                "Factory for {} built an adapter for {}",
                config.source,
                adapter.source()
            )));
        }
        Ok(Arc::from(adapter))
    }

    /// Build adapters for every configured source, in declaration order
    ///
    /// Disabled sources are still built so they can report themselves as
    /// disabled; an unregistered source is a configuration error.
    pub fn create_all(&self, configs: &[SourceConfig]) -> Result<Vec<Arc<dyn SourceAdapter>>> {
        configs.iter().map(|c| self.create_adapter(c)).collect()
    }

    pub fn list_sources(&self) -> Vec<SourceKind> {
        let factories = self.factories.read().unwrap_or_else(|e| e.into_inner());
        let mut sources: Vec<SourceKind> = factories.keys().copied().collect();
        sources.sort();
        sources
    }

    pub fn has_source(&self, source: SourceKind) -> bool {
        let factories = self.factories.read().unwrap_or_else(|e| e.into_inner());
        factories.contains_key(&source)
    }
}

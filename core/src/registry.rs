//! Feature source registry.
//!
//! Each discovery backend (CPU, kernel, PCI, ...) implements [`FeatureSource`] and is
//! registered under its domain name. [`SourceRegistry::snapshot`] runs every
//! source once and assembles the [`Features`] that rules are evaluated against.
//!
//! # Example
//!
//! ```
//! use nodelabel::{DomainFeatures, SourceRegistryBuilder, StaticSource};
//!
//! let registry = SourceRegistryBuilder::new()
//!     .source(StaticSource::new(
//!         "kernel",
//!         DomainFeatures::new().with_keys("loadedmodule", ["kvm"]),
//!     ))
//!     .build();
//!
//! let features = registry.snapshot();
//! assert!(features.domain("kernel").is_some());
//! ```
//!
//! The registry is immutable once built, so one snapshot can be taken per
//! labeling pass without coordination.

use std::collections::BTreeMap;

use tracing::error;

use crate::{DomainFeatures, Features, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Traits
// ═══════════════════════════════════════════════════════════════════════════════

/// A producer of one feature domain.
pub trait FeatureSource: Send + Sync {
    /// Domain name, used as the first part of `domain.feature` references.
    fn name(&self) -> &str;

    /// Discover the domain's features.
    ///
    /// # Errors
    ///
    /// Any error; the registry logs it and leaves the domain out of the
    /// snapshot.
    fn discover(&self) -> Result<DomainFeatures>;
}

/// A source returning a fixed domain. Useful for tests and replayed snapshots.
#[derive(Debug, Clone)]
pub struct StaticSource {
    name: String,
    features: DomainFeatures,
}

impl StaticSource {
    /// Wrap a fixed domain.
    pub fn new(name: impl Into<String>, features: DomainFeatures) -> Self {
        Self {
            name: name.into(),
            features,
        }
    }
}

impl FeatureSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn discover(&self) -> Result<DomainFeatures> {
        Ok(self.features.clone())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Builder
// ═══════════════════════════════════════════════════════════════════════════════

/// Builder for [`SourceRegistry`].
#[derive(Default)]
pub struct SourceRegistryBuilder {
    sources: BTreeMap<String, Box<dyn FeatureSource>>,
}

impl SourceRegistryBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source. A later source with the same name replaces the
    /// earlier one.
    #[must_use]
    pub fn source(mut self, source: impl FeatureSource + 'static) -> Self {
        self.sources
            .insert(source.name().to_owned(), Box::new(source));
        self
    }

    /// Register a boxed source.
    #[must_use]
    pub fn boxed_source(mut self, source: Box<dyn FeatureSource>) -> Self {
        self.sources.insert(source.name().to_owned(), source);
        self
    }

    /// Freeze the registry.
    #[must_use]
    pub fn build(self) -> SourceRegistry {
        SourceRegistry {
            sources: self.sources,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════════════

/// Immutable set of feature sources, keyed by domain name.
pub struct SourceRegistry {
    sources: BTreeMap<String, Box<dyn FeatureSource>>,
}

impl SourceRegistry {
    /// Registered domain names, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Number of registered sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns `true` if no source is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Run every source and collect the results.
    ///
    /// A failing source is logged and its domain is omitted; rules that
    /// reference it then fail individually.
    #[must_use]
    pub fn snapshot(&self) -> Features {
        let mut features = Features::new();
        for (name, source) in &self.sources {
            match source.discover() {
                Ok(domain) => features.insert(name.clone(), domain),
                Err(err) => error!(source = %name, error = %err, "feature discovery failed"),
            }
        }
        features
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .finish()
    }
}

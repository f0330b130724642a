//! # Message Type Registry
//!
//! Maps `(direction, category, schema version)` to a published [`MessageDescriptor`].
//!
//! ## Concurrency
//! Readers load an immutable snapshot through `ArcSwap` and never take a lock, so
//! classification from hundreds of connection units does not contend. Writers are
//! serialized by a mutex, build a complete new snapshot and swap it in one store: a
//! dispatch pass either sees a schema version completely or not at all, and keeps the
//! descriptor `Arc` it resolved even if an upgrade lands mid-pass.

use crate::core::catalog::SchemaCatalog;
use crate::core::descriptor::MessageDescriptor;
use crate::core::types::{CategoryId, DescriptorKey, Direction, SchemaVersion};
use crate::error::{InterceptError, Result};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(Debug, Default, Clone)]
struct RegistrySnapshot {
    by_key: HashMap<DescriptorKey, Arc<MessageDescriptor>>,
    by_name: HashMap<(Direction, SchemaVersion, String), Arc<MessageDescriptor>>,
    versions: BTreeSet<SchemaVersion>,
}

impl RegistrySnapshot {
    fn insert(&mut self, descriptor: Arc<MessageDescriptor>) -> Result<()> {
        let key = descriptor.key();
        if self.by_key.contains_key(&key) {
            return Err(InterceptError::ConflictingDescriptor {
                direction: key.direction,
                category: key.category,
                version: key.version,
            });
        }
        let name_key = (key.direction, key.version, descriptor.name().to_string());
        if self.by_name.contains_key(&name_key) {
            return Err(InterceptError::InvalidSchema(format!(
                "name {} already used by another {} category in {}",
                descriptor.name(),
                key.direction,
                key.version
            )));
        }
        self.by_name.insert(name_key, Arc::clone(&descriptor));
        self.by_key.insert(key, descriptor);
        self.versions.insert(key.version);
        Ok(())
    }
}

/// Registry of message descriptors for every loaded schema version
#[derive(Debug)]
pub struct MessageTypeRegistry {
    snapshot: ArcSwap<RegistrySnapshot>,
    write_lock: Mutex<()>,
}

impl Default for MessageTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageTypeRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RegistrySnapshot::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Look up the descriptor of a category in a schema version
    #[inline]
    pub fn resolve(
        &self,
        direction: Direction,
        category: CategoryId,
        version: SchemaVersion,
    ) -> Result<Arc<MessageDescriptor>> {
        let key = DescriptorKey::new(direction, category, version);
        self.snapshot
            .load()
            .by_key
            .get(&key)
            .cloned()
            .ok_or(InterceptError::UnknownType {
                direction,
                category,
                version,
            })
    }

    /// Look up a descriptor by its declared name
    pub fn resolve_by_name(
        &self,
        direction: Direction,
        name: &str,
        version: SchemaVersion,
    ) -> Option<Arc<MessageDescriptor>> {
        self.snapshot
            .load()
            .by_name
            .get(&(direction, version, name.to_string()))
            .cloned()
    }

    /// Publish one descriptor
    pub fn register(&self, descriptor: MessageDescriptor) -> Result<Arc<MessageDescriptor>> {
        let mut published = self.register_all(vec![descriptor])?;
        published
            .pop()
            .ok_or_else(|| InterceptError::Custom("registration produced no descriptor".into()))
    }

    /// Publish a batch atomically: on any conflict nothing is published
    pub fn register_all(
        &self,
        descriptors: Vec<MessageDescriptor>,
    ) -> Result<Vec<Arc<MessageDescriptor>>> {
        let _guard = self.write_lock.lock();
        let mut next = RegistrySnapshot::clone(&self.snapshot.load());
        let mut published = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let descriptor = Arc::new(descriptor);
            next.insert(Arc::clone(&descriptor))?;
            debug!(descriptor = %descriptor, "Descriptor staged");
            published.push(descriptor);
        }
        self.snapshot.store(Arc::new(next));
        Ok(published)
    }

    /// Publish a complete versioned catalog atomically
    #[instrument(skip(self, catalog), fields(version = %catalog.version, messages = catalog.messages.len()))]
    pub fn register_catalog(&self, catalog: &SchemaCatalog) -> Result<usize> {
        let descriptors = catalog.to_descriptors()?;
        let count = descriptors.len();
        self.register_all(descriptors)?;
        info!(version = %catalog.version, count, "Schema catalog published");
        Ok(count)
    }

    /// Whether any descriptor was published for `version`
    pub fn knows_version(&self, version: SchemaVersion) -> bool {
        self.snapshot.load().versions.contains(&version)
    }

    /// All loaded schema versions, ascending
    pub fn versions(&self) -> Vec<SchemaVersion> {
        self.snapshot.load().versions.iter().copied().collect()
    }

    /// Every descriptor of one version, ordered by direction then category
    pub fn descriptors(&self, version: SchemaVersion) -> Vec<Arc<MessageDescriptor>> {
        let snapshot = self.snapshot.load();
        let mut found: Vec<_> = snapshot
            .by_key
            .values()
            .filter(|d| d.version() == version)
            .cloned()
            .collect();
        found.sort_by_key(|d| (d.direction().index(), d.category()));
        found
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

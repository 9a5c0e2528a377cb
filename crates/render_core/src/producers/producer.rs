//! Producer systems feeding render pipelines

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::producers::InstanceRecord;

/// Source of instances drawn by render pipelines
pub trait RenderProducer: Send + Sync {
    /// Number of records currently held
    fn instance_count(&self) -> usize;

    /// Visit records in container order
    fn for_each_record(&self, visit: &mut dyn FnMut(&InstanceRecord));

    /// Whether there is nothing to draw
    fn is_empty(&self) -> bool {
        self.instance_count() == 0
    }
}

/// Producer systems a pipeline can pull from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProducerKind {
    /// Static and dynamic models
    Models,
    /// Grass, bushes and trees
    Vegetation,
    /// Terrain patches
    Terrain,
    /// Interface quads
    UserInterface,
}

/// Thread-safe record list a producer system fills between frames
#[derive(Default)]
pub struct InstanceStore {
    records: RwLock<Vec<InstanceRecord>>,
}

impl InstanceStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every record
    pub fn replace(&self, records: Vec<InstanceRecord>) {
        *self.records.write() = records;
    }

    /// Append a record
    pub fn push(&self, record: InstanceRecord) {
        self.records.write().push(record);
    }

    /// Remove every record
    pub fn clear(&self) {
        self.records.write().clear();
    }

    /// Edit records in place, e.g. to write culling results
    pub fn update(&self, edit: impl FnOnce(&mut Vec<InstanceRecord>)) {
        edit(&mut *self.records.write());
    }
}

impl RenderProducer for InstanceStore {
    fn instance_count(&self) -> usize {
        self.records.read().len()
    }

    fn for_each_record(&self, visit: &mut dyn FnMut(&InstanceRecord)) {
        for record in self.records.read().iter() {
            visit(record);
        }
    }
}

/// Producers by kind
#[derive(Default, Clone)]
pub struct ProducerRegistry {
    producers: HashMap<ProducerKind, Arc<dyn RenderProducer>>,
}

impl ProducerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the producer for a kind
    pub fn register(&mut self, kind: ProducerKind, producer: Arc<dyn RenderProducer>) {
        if self.producers.insert(kind, producer).is_some() {
            log::debug!("Replaced {:?} producer", kind);
        }
    }

    /// Producer for a kind
    pub fn get(&self, kind: ProducerKind) -> Option<&Arc<dyn RenderProducer>> {
        self.producers.get(&kind)
    }

    /// Instances held by a kind; unregistered kinds hold none
    pub fn instance_count(&self, kind: ProducerKind) -> usize {
        self.get(kind).map_or(0, |p| p.instance_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::BufferHandle;

    #[test]
    fn store_visits_in_insertion_order() {
        let store = InstanceStore::new();
        for count in [3, 6, 9] {
            store.push(InstanceRecord::new(BufferHandle::default(), count));
        }
        let mut seen = Vec::new();
        store.for_each_record(&mut |r| seen.push(r.vertex_count));
        assert_eq!(seen, vec![3, 6, 9]);

        store.update(|records| records.retain(|r| r.vertex_count > 3));
        assert_eq!(store.instance_count(), 2);
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn unregistered_kinds_are_empty() {
        let mut registry = ProducerRegistry::new();
        let store = Arc::new(InstanceStore::new());
        store.push(InstanceRecord::new(BufferHandle::default(), 3));
        registry.register(ProducerKind::Models, store);

        assert_eq!(registry.instance_count(ProducerKind::Models), 1);
        assert_eq!(registry.instance_count(ProducerKind::Vegetation), 0);
        assert!(registry.get(ProducerKind::Terrain).is_none());
    }
}

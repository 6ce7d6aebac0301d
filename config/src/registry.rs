//! Thread-safe endpoint registry.
//!
//! Seeded from static configuration at startup. Administrative code and test
//! fixtures may add or remove descriptors at runtime; lookups hand out `Arc`
//! snapshots so a descriptor never changes underneath an in-flight request.

use crate::endpoint::EndpointDescriptor;
use crate::error::{ConfigError, ConfigResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct EndpointRegistry {
    descriptors: RwLock<BTreeMap<String, Arc<EndpointDescriptor>>>
}

impl EndpointRegistry {
    pub fn new<I>(descriptors: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = EndpointDescriptor>
    {
        let mut map = BTreeMap::new();
        for mut descriptor in descriptors {
            descriptor.check()?;
            descriptor.normalize();
            if map.contains_key(&descriptor.resource_type) {
                return Err(ConfigError::DuplicateResourceType {
                    resource_type: descriptor.resource_type
                });
            }
            map.insert(descriptor.resource_type.clone(), Arc::new(descriptor));
        }

        info!(count = map.len(), "Endpoint registry initialized");
        Ok(Self {
            descriptors: RwLock::new(map)
        })
    }

    /// Returns the enabled descriptor for `resource_type`.
    ///
    /// Disabled descriptors are invisible to lookups.
    pub fn lookup(&self, resource_type: &str) -> Option<Arc<EndpointDescriptor>> {
        self.descriptors
            .read()
            .get(resource_type)
            .filter(|descriptor| descriptor.enabled)
            .cloned()
    }

    pub fn contains(&self, resource_type: &str) -> bool {
        self.lookup(resource_type).is_some()
    }

    /// Inserts or replaces the descriptor for its resource type.
    pub fn add_endpoint_descriptor(
        &self,
        mut descriptor: EndpointDescriptor
    ) -> ConfigResult<Option<Arc<EndpointDescriptor>>> {
        descriptor.check()?;
        descriptor.normalize();
        debug!(resource_type = %descriptor.resource_type, "Registering endpoint descriptor");
        let previous = self
            .descriptors
            .write()
            .insert(descriptor.resource_type.clone(), Arc::new(descriptor));
        Ok(previous)
    }

    pub fn remove_endpoint_descriptor(
        &self,
        resource_type: &str
    ) -> Option<Arc<EndpointDescriptor>> {
        debug!(resource_type = %resource_type, "Removing endpoint descriptor");
        self.descriptors.write().remove(resource_type)
    }

    pub fn descriptors(&self) -> Vec<Arc<EndpointDescriptor>> {
        self.descriptors
            .read()
            .values()
            .filter(|descriptor| descriptor.enabled)
            .cloned()
            .collect()
    }

    /// Distinct index names of every enabled denormalized descriptor, sorted.
    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .descriptors
            .read()
            .values()
            .filter(|descriptor| descriptor.enabled)
            .filter_map(|descriptor| descriptor.index().map(str::to_string))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// True when some other enabled descriptor declares `resource_type` as a
    /// reverse relationship. A descriptor naming its own type does not count.
    pub fn is_embeddable(&self, resource_type: &str) -> bool {
        self.descriptors
            .read()
            .values()
            .any(|descriptor| owns(descriptor, resource_type))
    }

    pub fn owners_of(&self, resource_type: &str) -> Vec<Arc<EndpointDescriptor>> {
        self.descriptors
            .read()
            .values()
            .filter(|descriptor| owns(descriptor, resource_type))
            .cloned()
            .collect()
    }

    pub fn descriptor_for_index(&self, index_name: &str) -> Option<Arc<EndpointDescriptor>> {
        self.descriptors
            .read()
            .values()
            .find(|descriptor| descriptor.enabled && descriptor.index() == Some(index_name))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.descriptors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.read().is_empty()
    }
}

fn owns(descriptor: &EndpointDescriptor, resource_type: &str) -> bool {
    descriptor.enabled
        && descriptor.resource_type != resource_type
        && descriptor.embeds(resource_type)
}

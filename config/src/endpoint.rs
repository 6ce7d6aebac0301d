//! Endpoint descriptors.
//!
//! One descriptor per upstream JSON:API resource type. A descriptor with an
//! `indexName` is denormalized: documents of that type are written to the
//! named search index. `reverseRelationshipTypes` lists the resource types
//! this type embeds in its `included` array.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use validator::ValidateUrl;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescriptor {
    pub resource_type: String,

    #[serde(rename = "baseURL", alias = "baseUrl")]
    pub base_url: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Relationships requested through the `include` query parameter, in
    /// request order.
    #[serde(default)]
    pub include_relationships: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,

    #[serde(default)]
    pub reverse_relationship_types: BTreeSet<String>
}

fn default_enabled() -> bool {
    true
}

impl EndpointDescriptor {
    pub fn new(resource_type: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            base_url: base_url.into(),
            enabled: true,
            include_relationships: Vec::new(),
            index_name: None,
            reverse_relationship_types: BTreeSet::new()
        }
    }

    #[must_use]
    pub fn with_index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    #[must_use]
    pub fn with_includes<I, S>(mut self, relationships: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>
    {
        self.include_relationships = relationships.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_reverse_relationships<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>
    {
        self.reverse_relationship_types = types.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// A descriptor with a non-empty index name contributes to the embedded
    /// index.
    pub fn is_denormalized(&self) -> bool {
        self.index_name.as_deref().is_some_and(|name| !name.is_empty())
    }

    pub fn index(&self) -> Option<&str> {
        self.index_name.as_deref().filter(|name| !name.is_empty())
    }

    pub fn embeds(&self, resource_type: &str) -> bool {
        self.reverse_relationship_types.contains(resource_type)
    }

    /// Comma-joined `include` parameter value, `None` when nothing is included.
    pub fn include_param(&self) -> Option<String> {
        if self.include_relationships.is_empty() {
            None
        } else {
            Some(self.include_relationships.join(","))
        }
    }

    /// Drops duplicate relationships, keeping first-occurrence order.
    pub fn normalize(&mut self) {
        let mut seen = HashSet::new();
        self.include_relationships
            .retain(|relationship| seen.insert(relationship.clone()));
    }

    pub fn check(&self) -> ConfigResult<()> {
        if !self.base_url.validate_url() {
            return Err(ConfigError::InvalidBaseUrl {
                resource_type: self.resource_type.clone(),
                base_url: self.base_url.clone()
            });
        }
        Ok(())
    }
}

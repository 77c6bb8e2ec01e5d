//! Page-builder block-type registry.
//!
//! Structural sibling of [`crate::registry::ExtensionRegistry`]: the same
//! validate/add/lookup/search pattern over the building blocks the page
//! editor offers, without lifecycle or dependency concerns.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::registry::ValidationIssue;

/// One page-builder building block, either built in or contributed by an
/// extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockType {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Editor palette group (e.g. `"layout"`, `"media"`, `"embeds"`).
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

/// Catalog of block types available to the page editor.
#[derive(Debug, Default)]
pub struct BlockRegistry {
    blocks: RwLock<Vec<BlockType>>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate_against(existing: &[BlockType], block: &BlockType) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if block.id.is_empty() {
            issues.push(ValidationIssue {
                field: "id",
                message: "must not be empty".into(),
            });
        }
        if block.name.is_empty() {
            issues.push(ValidationIssue {
                field: "name",
                message: "must not be empty".into(),
            });
        }
        if existing.iter().any(|b| b.id == block.id) {
            issues.push(ValidationIssue {
                field: "id",
                message: "block id already registered".into(),
            });
        }
        issues
    }

    /// Validates and stores a block type; duplicate ids are refused.
    pub fn add(&self, block: BlockType) -> Vec<ValidationIssue> {
        let mut blocks = self.blocks.write().expect("block registry lock poisoned");
        let issues = Self::validate_against(&blocks, &block);
        if !issues.is_empty() {
            tracing::warn!(id = %block.id, "refusing invalid block type");
            return issues;
        }
        blocks.push(block);
        Vec::new()
    }

    pub fn try_add(&self, block: BlockType) -> Result<(), Error> {
        let issues = self.add(block);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(
                issues
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            ))
        }
    }

    pub fn get(&self, id: &str) -> Option<BlockType> {
        self.blocks
            .read()
            .expect("block registry lock poisoned")
            .iter()
            .find(|b| b.id == id)
            .cloned()
    }

    pub fn has(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn all(&self) -> Vec<BlockType> {
        self.blocks
            .read()
            .expect("block registry lock poisoned")
            .clone()
    }

    pub fn by_category(&self, category: &str) -> Vec<BlockType> {
        self.blocks
            .read()
            .expect("block registry lock poisoned")
            .iter()
            .filter(|b| b.category == category)
            .cloned()
            .collect()
    }

    /// Case-insensitive keyword search over name, description, and keywords.
    pub fn search(&self, keyword: &str) -> Vec<BlockType> {
        let keyword = keyword.to_lowercase();
        self.blocks
            .read()
            .expect("block registry lock poisoned")
            .iter()
            .filter(|b| {
                b.name.to_lowercase().contains(&keyword)
                    || b.description.to_lowercase().contains(&keyword)
                    || b.keywords.iter().any(|k| k.to_lowercase().contains(&keyword))
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.blocks
            .read()
            .expect("block registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

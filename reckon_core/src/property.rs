//! Typed entity properties and the sparse deltas the server replicates.

use crate::id::PropertyId;
use bevy_math::Vec3;
use bevy_platform::collections::HashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Tagged value stored in an entity's property map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Number(f32),
    Bool(bool),
    Vector(Vec3),
    Array(SmallVec<[f32; 4]>),
}

impl PropertyValue {
    /// Numeric view, for predictors that only act on scalar properties.
    pub fn as_number(&self) -> Option<f32> {
        match self {
            PropertyValue::Number(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<f32> for PropertyValue {
    fn from(value: f32) -> Self {
        PropertyValue::Number(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<Vec3> for PropertyValue {
    fn from(value: Vec3) -> Self {
        PropertyValue::Vector(value)
    }
}

/// Sparse set of property changes, in arrival order. Applying a delta is
/// last-write-wins per id, so a delta may safely contain duplicate ids.
pub type PropertyDelta = SmallVec<[(PropertyId, PropertyValue); 4]>;

/// Sparse mapping from property id to value. Insertion order is irrelevant;
/// the last write for a given id wins. Only [`PropertyDelta`]s travel on the
/// wire; the map itself never does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyMap {
    values: HashMap<PropertyId, PropertyValue>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: PropertyId) -> Option<&PropertyValue> {
        self.values.get(&id)
    }

    pub fn set(&mut self, id: PropertyId, value: impl Into<PropertyValue>) {
        self.values.insert(id, value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PropertyId, &PropertyValue)> {
        self.values.iter()
    }

    /// Apply a replicated delta, returning the ids whose value actually
    /// changed. Untouched ids are left as-is.
    pub fn apply(&mut self, delta: &PropertyDelta) -> SmallVec<[PropertyId; 4]> {
        let mut changed = SmallVec::new();
        for (id, value) in delta {
            if self.values.get(id) != Some(value) {
                self.values.insert(*id, value.clone());
                if !changed.contains(id) {
                    changed.push(*id);
                }
            }
        }
        changed
    }
}

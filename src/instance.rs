//! Deduplicated instances and the linked object graph.
//!
//! Instances are arena-owned: every instance lives in the [`ObjectGraph`]
//! for its run, and relation slots hold lightweight [`InstanceRef`] handles
//! into that arena instead of shared pointers. Linked graphs are cyclic by
//! construction (back-references), so handle indirection keeps ownership
//! single and mutation confined to the linking pass.

use std::collections::HashMap;

use crate::index::{SchemaIndex, SlotDef};
use crate::schema::Cardinality;
use crate::value::{FieldMap, PrimaryKey, Value};

const NULL: Value = Value::Null;

/// Handle to an instance inside an [`ObjectGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceRef {
    pub(crate) entity: usize,
    pub(crate) index: usize,
}

/// One relation slot on an instance, typed by cardinality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationSlot {
    /// At most one related instance; `None` until (and unless) linked.
    One(Option<InstanceRef>),
    /// Related instances in first-observed foreign-key order.
    Many(Vec<InstanceRef>),
}

impl RelationSlot {
    pub(crate) fn empty(cardinality: Cardinality) -> Self {
        match cardinality {
            Cardinality::One => RelationSlot::One(None),
            Cardinality::Many => RelationSlot::Many(Vec::new()),
        }
    }
}

/// One deduplicated, typed entity instance.
///
/// Constructed once per distinct primary key during grouping; relation
/// slots are populated during linking.
#[derive(Debug, Clone)]
pub struct Instance {
    entity: usize,
    key: PrimaryKey,
    fields: FieldMap,
    slots: Vec<RelationSlot>,
}

impl Instance {
    pub(crate) fn new(
        entity: usize,
        key: PrimaryKey,
        fields: FieldMap,
        slot_defs: &[SlotDef],
    ) -> Self {
        Self {
            entity,
            key,
            fields,
            slots: slot_defs
                .iter()
                .map(|s| RelationSlot::empty(s.cardinality))
                .collect(),
        }
    }

    /// This instance's primary key.
    pub fn key(&self) -> &PrimaryKey {
        &self.key
    }

    /// Validated scalar field values (primary-key columns included).
    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Get a scalar field value; missing fields read as null.
    pub fn field(&self, name: &str) -> &Value {
        self.fields.get(name).unwrap_or(&NULL)
    }

    /// Relation slot by index (see [`crate::index::EntityIndex::slot_index`]).
    pub fn slot(&self, index: usize) -> &RelationSlot {
        &self.slots[index]
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut RelationSlot {
        &mut self.slots[index]
    }

    pub(crate) fn entity_position(&self) -> usize {
        self.entity
    }
}

/// The reconstructed, linked object graph for one run.
///
/// Owns every instance, keyed by entity-type name; provides typed relation
/// accessors resolved through the schema index's slot tables.
#[derive(Debug, Clone)]
pub struct ObjectGraph {
    entity_names: Vec<String>,
    slot_tables: Vec<Vec<SlotDef>>,
    by_name: HashMap<String, usize>,
    instances: Vec<Vec<Instance>>,
}

impl ObjectGraph {
    pub(crate) fn new(index: &SchemaIndex, instances: Vec<Vec<Instance>>) -> Self {
        let entity_names: Vec<String> =
            index.entities().iter().map(|e| e.name.clone()).collect();
        let slot_tables: Vec<Vec<SlotDef>> =
            index.entities().iter().map(|e| e.slots.clone()).collect();
        let by_name = entity_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Self {
            entity_names,
            slot_tables,
            by_name,
            instances,
        }
    }

    /// Entity-type names, in schema declaration order.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entity_names.iter().map(String::as_str)
    }

    /// Instances of one entity type, in first-occurrence order of their
    /// primary keys in the input. Empty for an unknown name.
    pub fn entities(&self, name: &str) -> &[Instance] {
        match self.by_name.get(name) {
            Some(&i) => &self.instances[i],
            None => &[],
        }
    }

    /// Resolve an instance handle.
    pub fn instance(&self, r: InstanceRef) -> &Instance {
        &self.instances[r.entity][r.index]
    }

    /// Find an instance of one entity type by primary key (linear scan;
    /// convenience for callers and tests, not used by linking).
    pub fn find(&self, entity: &str, key: &PrimaryKey) -> Option<&Instance> {
        self.entities(entity).iter().find(|i| i.key() == key)
    }

    /// Resolve a to-one relation attribute on an instance.
    ///
    /// Returns `None` if the attribute is unknown, holds a list, or was
    /// never linked (no matching related instance).
    pub fn to_one<'a>(&'a self, instance: &Instance, attribute: &str) -> Option<&'a Instance> {
        let slot = self.slot_of(instance, attribute)?;
        match slot {
            RelationSlot::One(Some(r)) => Some(self.instance(*r)),
            _ => None,
        }
    }

    /// Resolve a to-many relation attribute on an instance.
    ///
    /// Returns an empty list if the attribute is unknown, holds a single
    /// reference, or nothing resolved during linking.
    pub fn to_many<'a>(&'a self, instance: &Instance, attribute: &str) -> Vec<&'a Instance> {
        match self.slot_of(instance, attribute) {
            Some(RelationSlot::Many(refs)) => refs.iter().map(|&r| self.instance(r)).collect(),
            _ => Vec::new(),
        }
    }

    /// Total instance count across all entity types.
    pub fn len(&self) -> usize {
        self.instances.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render the graph as JSON: per entity type, each instance's scalar
    /// fields plus the primary keys of its related instances.
    ///
    /// Related instances are rendered by key rather than inline because
    /// linked graphs contain reference cycles.
    pub fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for (e, name) in self.entity_names.iter().enumerate() {
            let rendered: Vec<serde_json::Value> = self.instances[e]
                .iter()
                .map(|instance| {
                    let mut obj = serde_json::Map::new();
                    for (field, value) in instance.fields() {
                        obj.insert(field.clone(), value.to_json());
                    }
                    for (s, def) in self.slot_tables[e].iter().enumerate() {
                        match instance.slot(s) {
                            RelationSlot::One(r) => {
                                let key = r.map(|r| self.key_json(r));
                                obj.insert(
                                    def.attribute.clone(),
                                    key.unwrap_or(serde_json::Value::Null),
                                );
                            }
                            RelationSlot::Many(refs) => {
                                let keys: Vec<serde_json::Value> =
                                    refs.iter().map(|&r| self.key_json(r)).collect();
                                obj.insert(def.attribute.clone(), serde_json::Value::Array(keys));
                            }
                        }
                    }
                    serde_json::Value::Object(obj)
                })
                .collect();
            out.insert(name.clone(), serde_json::Value::Array(rendered));
        }
        serde_json::Value::Object(out)
    }

    #[cfg(test)]
    pub(crate) fn instances_mut(&mut self) -> &mut Vec<Vec<Instance>> {
        &mut self.instances
    }

    fn slot_of<'a>(&self, instance: &'a Instance, attribute: &str) -> Option<&'a RelationSlot> {
        let table = &self.slot_tables[instance.entity_position()];
        let idx = table.iter().position(|s| s.attribute == attribute)?;
        Some(instance.slot(idx))
    }

    fn key_json(&self, r: InstanceRef) -> serde_json::Value {
        let mut components: Vec<serde_json::Value> = self
            .instance(r)
            .key()
            .components()
            .iter()
            .map(Value::to_json)
            .collect();
        if components.len() == 1 {
            components.remove(0)
        } else {
            serde_json::Value::Array(components)
        }
    }
}

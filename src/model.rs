use std::sync::Arc;

// other keepers use HashSet or HashMap
use core::hash::BuildHasherDefault;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use seahash::SeaHasher;

// used to print out readable forms of a construct
use std::fmt;

use serde_json::Value;

use crate::error::{ArborError, Result};
use crate::expr::Expression;

// ------------- ObjectId -------------
// Every tracked data object gets a stable integer handle on creation.
// Trigger state and the type registry are handle-indexed tables owned by
// the root service, so object lifetime is bounded by the root's lifecycle
// rather than by external references.
pub type ObjectId = u64;

pub type IdHasher = BuildHasherDefault<SeaHasher>;
pub type OtherHasher = BuildHasherDefault<SeaHasher>;

pub const GENESIS: ObjectId = 0;

/// A raw record: the backend-native representation of one object prior to
/// mapping, keyed by backend-specific field names.
pub type RawRecord = serde_json::Map<String, Value>;

#[derive(Debug)]
pub struct ObjectIdGenerator {
    lower_bound: ObjectId,
    retained: HashSet<ObjectId, IdHasher>,
    released: Vec<ObjectId>,
}

impl ObjectIdGenerator {
    pub fn new() -> Self {
        Self {
            lower_bound: GENESIS,
            retained: HashSet::<ObjectId, IdHasher>::default(),
            released: Vec::new(),
        }
    }
    pub fn release(&mut self, id: ObjectId) {
        if self.retained.remove(&id) {
            self.released.push(id);
        }
    }
    pub fn generate(&mut self) -> ObjectId {
        self.released.pop().unwrap_or_else(|| {
            self.lower_bound += 1;
            self.retained.insert(self.lower_bound);
            self.lower_bound
        })
    }
}

impl Default for ObjectIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ------------- PropertyDescriptor -------------
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Cardinality {
    One,
    Many,
}

pub struct PropertyDescriptor {
    name: String,
    value_type: Option<String>,
    is_relationship: bool,
    destination_type: Option<String>,
    cardinality: Cardinality,
    criteria_expressions: HashMap<String, Arc<dyn Expression>, OtherHasher>,
    target_properties: Vec<String>,
}

impl PropertyDescriptor {
    pub fn primitive(name: &str, value_type: &str) -> Self {
        Self {
            name: name.to_owned(),
            value_type: Some(value_type.to_owned()),
            is_relationship: false,
            destination_type: None,
            cardinality: Cardinality::One,
            criteria_expressions: HashMap::default(),
            target_properties: Vec::new(),
        }
    }
    pub fn relationship(name: &str, destination_type: &str, cardinality: Cardinality) -> Self {
        Self {
            name: name.to_owned(),
            value_type: None,
            is_relationship: true,
            destination_type: Some(destination_type.to_owned()),
            cardinality,
            criteria_expressions: HashMap::default(),
            target_properties: Vec::new(),
        }
    }
    /// Adds a criteria rule: when the relationship is fetched, `expression`
    /// is evaluated against the owning object and the result constrains
    /// `destination_property` on the destination type.
    pub fn with_criteria(mut self, destination_property: &str, expression: Arc<dyn Expression>) -> Self {
        self.criteria_expressions
            .insert(destination_property.to_owned(), expression);
        self
    }
    pub fn with_target_properties(mut self, properties: &[&str]) -> Self {
        self.target_properties = properties.iter().map(|p| (*p).to_owned()).collect();
        self
    }
    // It's intentional to encapsulate the fields in the struct and only
    // expose them using "getters", because this yields true immutability
    // for descriptors after creation.
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn value_type(&self) -> Option<&str> {
        self.value_type.as_deref()
    }
    pub fn is_relationship(&self) -> bool {
        self.is_relationship
    }
    pub fn destination_type(&self) -> Option<&str> {
        self.destination_type.as_deref()
    }
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }
    pub fn criteria_expressions(&self) -> &HashMap<String, Arc<dyn Expression>, OtherHasher> {
        &self.criteria_expressions
    }
    pub fn target_properties(&self) -> &[String] {
        &self.target_properties
    }
}

impl fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("name", &self.name)
            .field("is_relationship", &self.is_relationship)
            .field("destination_type", &self.destination_type)
            .field("cardinality", &self.cardinality)
            .finish()
    }
}

// ------------- DataObjectDescriptor -------------
pub struct DataObjectDescriptor {
    name: String,
    properties: HashMap<String, Arc<PropertyDescriptor>, OtherHasher>,
    identifiers: HashSet<String, OtherHasher>,
}

impl DataObjectDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            properties: HashMap::default(),
            identifiers: HashSet::default(),
        }
    }
    pub fn with_property(mut self, property: PropertyDescriptor) -> Self {
        self.properties
            .insert(property.name().to_owned(), Arc::new(property));
        self
    }
    pub fn with_identifier(mut self, name: &str) -> Self {
        self.identifiers.insert(name.to_owned());
        self
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn property(&self, name: &str) -> Option<&Arc<PropertyDescriptor>> {
        self.properties.get(name)
    }
    pub fn properties(&self) -> &HashMap<String, Arc<PropertyDescriptor>, OtherHasher> {
        &self.properties
    }
    pub fn identifiers(&self) -> &HashSet<String, OtherHasher> {
        &self.identifiers
    }
    pub fn relationships(&self) -> impl Iterator<Item = &Arc<PropertyDescriptor>> {
        self.properties.values().filter(|p| p.is_relationship())
    }
}

impl fmt::Display for DataObjectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({} properties)", self.name, self.properties.len())
    }
}

#[derive(Default)]
pub struct DescriptorKeeper {
    kept: HashMap<String, Arc<DataObjectDescriptor>, OtherHasher>,
}

impl DescriptorKeeper {
    pub fn new() -> Self {
        Self {
            kept: HashMap::default(),
        }
    }
    // Descriptors are process-wide singletons per type name: the first one
    // kept for a name wins and later ones are discarded.
    pub fn keep(&mut self, descriptor: DataObjectDescriptor) -> (Arc<DataObjectDescriptor>, bool) {
        let keepsake = descriptor.name().to_owned();
        let mut previously_kept = true;
        match self.kept.entry(keepsake.clone()) {
            Entry::Vacant(e) => {
                e.insert(Arc::new(descriptor));
                previously_kept = false;
            }
            Entry::Occupied(_e) => (),
        };
        let kept = self.kept.get(&keepsake).unwrap();
        (Arc::clone(kept), previously_kept)
    }
    pub fn get(&self, name: &str) -> Option<Arc<DataObjectDescriptor>> {
        self.kept.get(name).map(Arc::clone)
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
}

// ------------- ObjectStore -------------
// The arena of tracked objects, owned exclusively by the root service.
// Slots hold the current property values; the registry maps every handle
// to its type descriptor.
pub struct ObjectStore {
    id_generator: ObjectIdGenerator,
    slots: HashMap<ObjectId, RawRecord, IdHasher>,
    registry: HashMap<ObjectId, Arc<DataObjectDescriptor>, IdHasher>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self {
            id_generator: ObjectIdGenerator::new(),
            slots: HashMap::default(),
            registry: HashMap::default(),
        }
    }
    pub fn create(&mut self, descriptor: Arc<DataObjectDescriptor>) -> ObjectId {
        let object = self.id_generator.generate();
        self.slots.insert(object, RawRecord::new());
        self.registry.insert(object, descriptor);
        object
    }
    pub fn descriptor_of(&self, object: ObjectId) -> Option<Arc<DataObjectDescriptor>> {
        self.registry.get(&object).map(Arc::clone)
    }
    pub fn contains(&self, object: ObjectId) -> bool {
        self.registry.contains_key(&object)
    }
    pub fn value(&self, object: ObjectId, name: &str) -> Option<Value> {
        self.slots.get(&object).and_then(|slot| slot.get(name)).cloned()
    }
    pub fn set_value(&mut self, object: ObjectId, name: &str, value: Value) -> Result<()> {
        let slot = self
            .slots
            .get_mut(&object)
            .ok_or(ArborError::UnknownObject(object))?;
        slot.insert(name.to_owned(), value);
        Ok(())
    }
    pub fn record(&self, object: ObjectId) -> Option<RawRecord> {
        self.slots.get(&object).cloned()
    }
    /// Explicit removal API: the arena has no weak semantics, so owners
    /// evict objects they no longer track.
    pub fn evict(&mut self, object: ObjectId) {
        self.slots.remove(&object);
        self.registry.remove(&object);
        self.id_generator.release(object);
    }
    pub fn len(&self) -> usize {
        self.registry.len()
    }
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

use crate::core::{Key, Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A stored record: a JSON object whose primary key lives at the
/// collection's key path.
pub type Record = serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    pub key_path: String,
    pub unique: bool,
}

impl IndexSchema {
    /// Non-unique index named after the field it covers.
    pub fn on(key_path: impl Into<String>) -> Self {
        let key_path = key_path.into();
        Self {
            name: key_path.clone(),
            key_path,
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    name: String,
    key_path: String,
    auto_increment: bool,
    indexes: Vec<IndexSchema>,
}

impl CollectionSchema {
    /// Collection whose records carry their own primary key at `key_path`.
    pub fn keyed(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            auto_increment: false,
            indexes: Vec::new(),
        }
    }

    /// Collection that assigns increasing integer keys to records lacking one.
    pub fn auto_increment(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            auto_increment: true,
            ..Self::keyed(name, key_path)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_path(&self) -> &str {
        &self.key_path
    }

    pub fn is_auto_increment(&self) -> bool {
        self.auto_increment
    }

    pub fn indexes(&self) -> &[IndexSchema] {
        &self.indexes
    }

    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|idx| idx.name == name)
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.index(name).is_some()
    }
}

/// Serializable form of a collection. Index contents are derived data and
/// are rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    pub schema: CollectionSchema,
    pub records: Vec<Record>,
    pub next_id: i64,
}

#[derive(Debug, Clone)]
pub struct Collection {
    schema: CollectionSchema,
    records: BTreeMap<Key, Record>,
    next_id: i64,
    indexes: HashMap<String, BTreeMap<Key, BTreeSet<Key>>>,
}

impl Collection {
    pub fn new(schema: CollectionSchema) -> Self {
        let indexes = schema
            .indexes
            .iter()
            .map(|idx| (idx.name.clone(), BTreeMap::new()))
            .collect();
        Self {
            schema,
            records: BTreeMap::new(),
            next_id: 1,
            indexes,
        }
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Next key an auto-increment collection will hand out.
    pub fn next_id(&self) -> i64 {
        self.next_id
    }

    pub fn get(&self, key: &Key) -> Option<&Record> {
        self.records.get(key)
    }

    /// All records in primary key order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Insert or replace the record with the same primary key.
    pub fn put(&mut self, mut record: Record) -> Result<Key> {
        let key = self.resolve_key(&mut record)?;
        self.check_unique(&key, &record)?;

        if let Some(old) = self.records.remove(&key) {
            self.remove_from_indexes(&key, &old);
        }
        self.add_to_indexes(&key, &record);
        self.records.insert(key.clone(), record);
        Ok(key)
    }

    /// Insert a record, failing if its primary key is already taken.
    pub fn add(&mut self, mut record: Record) -> Result<Key> {
        let key = self.resolve_key(&mut record)?;
        if self.records.contains_key(&key) {
            return Err(StoreError::ConstraintViolation(format!(
                "Key {} already exists in collection '{}'",
                key, self.schema.name
            )));
        }
        self.check_unique(&key, &record)?;
        self.add_to_indexes(&key, &record);
        self.records.insert(key.clone(), record);
        Ok(key)
    }

    pub fn delete(&mut self, key: &Key) -> bool {
        match self.records.remove(key) {
            Some(old) => {
                self.remove_from_indexes(key, &old);
                true
            }
            None => false,
        }
    }

    /// Records whose indexed field equals `value`, in primary key order.
    pub fn get_all_by_index(&self, index_name: &str, value: &Key) -> Result<Vec<&Record>> {
        let index = self.indexes.get(index_name).ok_or_else(|| {
            StoreError::ConstraintViolation(format!(
                "Index '{}' not found on collection '{}'",
                index_name, self.schema.name
            ))
        })?;

        Ok(index
            .get(value)
            .map(|keys| keys.iter().filter_map(|k| self.records.get(k)).collect())
            .unwrap_or_default())
    }

    /// Index values in ascending order, each with the primary keys it covers.
    pub fn index_entries(&self, index_name: &str) -> Result<Vec<(&Key, Vec<&Key>)>> {
        let index = self.indexes.get(index_name).ok_or_else(|| {
            StoreError::ConstraintViolation(format!(
                "Index '{}' not found on collection '{}'",
                index_name, self.schema.name
            ))
        })?;
        Ok(index
            .iter()
            .map(|(value, keys)| (value, keys.iter().collect()))
            .collect())
    }

    /// Creates an index. Returns `false` when an identical index already
    /// exists; a different definition under the same name is an error.
    pub fn create_index(&mut self, index: IndexSchema) -> Result<bool> {
        if let Some(existing) = self.schema.index(&index.name) {
            if *existing == index {
                return Ok(false);
            }
            return Err(StoreError::ConstraintViolation(format!(
                "Index '{}' on collection '{}' already exists with a different definition",
                index.name, self.schema.name
            )));
        }

        let mut entries: BTreeMap<Key, BTreeSet<Key>> = BTreeMap::new();
        for (key, record) in &self.records {
            if let Some(value) = Key::at_path(record, &index.key_path) {
                let keys = entries.entry(value).or_default();
                if index.unique && !keys.is_empty() {
                    return Err(StoreError::ConstraintViolation(format!(
                        "Cannot create unique index '{}': duplicate values in '{}'",
                        index.name, self.schema.name
                    )));
                }
                keys.insert(key.clone());
            }
        }

        self.indexes.insert(index.name.clone(), entries);
        self.schema.indexes.push(index);
        Ok(true)
    }

    pub fn to_snapshot(&self) -> CollectionSnapshot {
        CollectionSnapshot {
            schema: self.schema.clone(),
            records: self.records.values().cloned().collect(),
            next_id: self.next_id,
        }
    }

    pub fn from_snapshot(snapshot: CollectionSnapshot) -> Result<Self> {
        let mut collection = Collection::new(snapshot.schema);
        for record in snapshot.records {
            collection.put(record)?;
        }
        collection.next_id = collection.next_id.max(snapshot.next_id);
        Ok(collection)
    }

    fn resolve_key(&mut self, record: &mut Record) -> Result<Key> {
        let key_path = self.schema.key_path.as_str();
        let object = record.as_object_mut().ok_or_else(|| {
            StoreError::ConstraintViolation(format!(
                "Records in '{}' must be objects",
                self.schema.name
            ))
        })?;

        match object.get(key_path) {
            Some(raw) => {
                let key = Key::from_json(raw).ok_or_else(|| {
                    StoreError::ConstraintViolation(format!(
                        "Value at key path '{}' is not a valid key",
                        key_path
                    ))
                })?;
                if self.schema.auto_increment
                    && let Key::Integer(id) = key
                    && id >= self.next_id
                {
                    self.next_id = id + 1;
                }
                Ok(key)
            }
            None if self.schema.auto_increment => {
                let id = self.next_id;
                self.next_id += 1;
                object.insert(key_path.to_string(), serde_json::Value::from(id));
                Ok(Key::Integer(id))
            }
            None => Err(StoreError::ConstraintViolation(format!(
                "Record has no value at key path '{}'",
                key_path
            ))),
        }
    }

    fn check_unique(&self, key: &Key, record: &Record) -> Result<()> {
        for index in self.schema.indexes.iter().filter(|idx| idx.unique) {
            let Some(value) = Key::at_path(record, &index.key_path) else {
                continue;
            };
            let taken = self
                .indexes
                .get(&index.name)
                .and_then(|entries| entries.get(&value))
                .is_some_and(|keys| keys.iter().any(|k| k != key));
            if taken {
                return Err(StoreError::ConstraintViolation(format!(
                    "Unique index '{}' already contains value {}",
                    index.name, value
                )));
            }
        }
        Ok(())
    }

    fn add_to_indexes(&mut self, key: &Key, record: &Record) {
        for index in &self.schema.indexes {
            if let Some(value) = Key::at_path(record, &index.key_path)
                && let Some(entries) = self.indexes.get_mut(&index.name)
            {
                entries.entry(value).or_default().insert(key.clone());
            }
        }
    }

    fn remove_from_indexes(&mut self, key: &Key, record: &Record) {
        for index in &self.schema.indexes {
            if let Some(value) = Key::at_path(record, &index.key_path)
                && let Some(entries) = self.indexes.get_mut(&index.name)
                && let Some(keys) = entries.get_mut(&value)
            {
                keys.remove(key);
                if keys.is_empty() {
                    entries.remove(&value);
                }
            }
        }
    }
}

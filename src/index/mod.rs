pub mod enumerator;

pub use enumerator::IndexEnumerator;

use crate::schema::{EntityId, FieldId, FieldKind, KeyPath, Schema};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use smallvec::SmallVec;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("an index needs at least one hash field")]
    EmptyHash,
    #[error("field '{field}' appears in more than one index role")]
    OverlappingFields { field: String },
    #[error("field '{field}' does not lie on the index path")]
    FieldOffPath { field: String },
    #[error("the identity key of the path's last entity must appear in hash or order fields")]
    UnkeyedLastEntity,
}

/// A materialized secondary structure: rows of `path` laid out under a
/// partition key (`hash_fields`), sorted within each partition by
/// `order_fields`, carrying `extra_fields` as stored payload. Immutable;
/// two indexes over the same field tuple share the same stable `key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    hash_fields: SmallVec<[FieldId; 2]>,
    order_fields: SmallVec<[FieldId; 4]>,
    extra_fields: BTreeSet<FieldId>,
    path: KeyPath,
    key: String,
    entry_size: u64,
    entries: f64,
    partitions: f64,
}

impl Index {
    pub fn new(
        schema: &Schema,
        hash_fields: impl IntoIterator<Item = FieldId>,
        order_fields: impl IntoIterator<Item = FieldId>,
        extra_fields: BTreeSet<FieldId>,
        path: KeyPath,
    ) -> Result<Index, IndexError> {
        let hash_fields: SmallVec<[FieldId; 2]> = hash_fields.into_iter().collect();
        let order_fields: SmallVec<[FieldId; 4]> = order_fields.into_iter().collect();
        if hash_fields.is_empty() {
            return Err(IndexError::EmptyHash);
        }

        let mut seen = BTreeSet::new();
        for &f in hash_fields.iter().chain(order_fields.iter()) {
            if !seen.insert(f) || extra_fields.contains(&f) {
                return Err(IndexError::OverlappingFields {
                    field: schema.qualified_name(f),
                });
            }
        }
        for &f in seen.iter().chain(extra_fields.iter()) {
            if path.find_field_parent(schema, f).is_none() {
                return Err(IndexError::FieldOffPath {
                    field: schema.qualified_name(f),
                });
            }
        }
        let last_id = schema.id_field(path.last_entity(schema));
        if !hash_fields.contains(&last_id) && !order_fields.contains(&last_id) {
            return Err(IndexError::UnkeyedLastEntity);
        }

        let entry_size: u64 = hash_fields
            .iter()
            .chain(order_fields.iter())
            .chain(extra_fields.iter())
            .map(|&f| schema.field(f).size())
            .sum();
        let entries = Self::estimate_entries(schema, &path);
        let partitions = hash_fields
            .iter()
            .map(|&f| schema.field_cardinality(f) as f64)
            .product::<f64>()
            .min(entries)
            .max(1.0);
        let key = Self::stable_key(schema, &hash_fields, &order_fields, &extra_fields, &path);

        Ok(Index {
            hash_fields,
            order_fields,
            extra_fields,
            path,
            key,
            entry_size,
            entries,
            partitions,
        })
    }

    /// The trivial per-entity materialization: identity hash, no order,
    /// every scalar field stored.
    pub fn simple(schema: &Schema, entity: EntityId) -> Index {
        let id = schema.id_field(entity);
        let extra: BTreeSet<FieldId> = schema
            .scalar_fields(entity)
            .filter(|&f| f != id)
            .collect();
        Self::new(
            schema,
            [id],
            [],
            extra,
            KeyPath::anchored(schema, entity),
        )
        .expect("a simple index is always well-formed")
    }

    /// Row estimate for a materialized path: the root count, expanded by
    /// the fan-out of every to-many edge walked.
    fn estimate_entries(schema: &Schema, path: &KeyPath) -> f64 {
        let mut entries = schema.entity(path.first_entity(schema)).count.max(1) as f64;
        for pos in 1..path.len() {
            let link = path.pairs(schema)[pos].1;
            if let FieldKind::ForeignKey { target, arity, .. } = schema.field(link).kind {
                if matches!(arity, crate::schema::Arity::Many) {
                    let source = schema.field(link).parent;
                    let fan = schema.entity(target).count.max(1) as f64
                        / schema.entity(source).count.max(1) as f64;
                    entries *= fan.max(1.0);
                }
            }
        }
        entries
    }

    fn stable_key(
        schema: &Schema,
        hash: &[FieldId],
        order: &[FieldId],
        extra: &BTreeSet<FieldId>,
        path: &KeyPath,
    ) -> String {
        let mut hasher = Sha256::new();
        let mut feed = |tag: &str, fields: &mut dyn Iterator<Item = FieldId>| {
            hasher.update(tag.as_bytes());
            for f in fields {
                hasher.update(schema.qualified_name(f).as_bytes());
                hasher.update(b"|");
            }
        };
        feed("h:", &mut hash.iter().copied());
        feed("o:", &mut order.iter().copied());
        feed("e:", &mut extra.iter().copied());
        hasher.update(b"p:");
        hasher.update(path.render(schema).as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn hash_fields(&self) -> &[FieldId] {
        &self.hash_fields
    }

    pub fn order_fields(&self) -> &[FieldId] {
        &self.order_fields
    }

    pub fn extra_fields(&self) -> &BTreeSet<FieldId> {
        &self.extra_fields
    }

    pub fn all_fields(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.hash_fields
            .iter()
            .chain(self.order_fields.iter())
            .copied()
            .chain(self.extra_fields.iter().copied())
    }

    pub fn contains_field(&self, field: FieldId) -> bool {
        self.all_fields().any(|f| f == field)
    }

    pub fn path(&self) -> &KeyPath {
        &self.path
    }

    /// Stable identifier: equal field tuples yield equal keys across runs.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Total storage estimate in bytes.
    pub fn size(&self) -> f64 {
        self.entry_size as f64 * self.entries
    }

    pub fn entries(&self) -> f64 {
        self.entries
    }

    /// Bytes per stored entry.
    pub fn entry_size(&self) -> u64 {
        self.entry_size
    }

    pub fn partitions(&self) -> f64 {
        self.partitions
    }

    /// Average rows per partition, used by cost models.
    pub fn entries_per_partition(&self) -> f64 {
        self.entries / self.partitions
    }

    /// Human-oriented rendering, e.g. `[User.name][Tweet.ts, Tweet.id] -> {Tweet.body} over User.tweets`.
    pub fn render(&self, schema: &Schema) -> String {
        let join = |fields: &mut dyn Iterator<Item = FieldId>| {
            fields
                .map(|f| schema.qualified_name(f))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "[{}][{}] -> {{{}}} over {}",
            join(&mut self.hash_fields.iter().copied()),
            join(&mut self.order_fields.iter().copied()),
            join(&mut self.extra_fields.iter().copied()),
            self.path.render(schema)
        )
    }
}

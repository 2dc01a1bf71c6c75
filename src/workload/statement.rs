use crate::index::Index;
use crate::schema::{EntityId, FieldId, KeyPath, Schema};
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOp {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl ConditionOp {
    pub fn is_equality(self) -> bool {
        matches!(self, ConditionOp::Eq)
    }
}

/// A parameterized read. Conditions hold placeholders, so only the fields
/// and operators matter for planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub label: String,
    pub path: KeyPath,
    pub select: SmallVec<[FieldId; 4]>,
    pub eq_fields: SmallVec<[FieldId; 4]>,
    pub range_field: Option<FieldId>,
    pub order_fields: SmallVec<[FieldId; 4]>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub label: String,
    /// Anchored at the mutated entity; conditions may reach through it.
    pub path: KeyPath,
    pub set_fields: SmallVec<[FieldId; 4]>,
    pub eq_fields: SmallVec<[FieldId; 4]>,
    pub range_field: Option<FieldId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insert {
    pub label: String,
    pub entity: EntityId,
    /// Trivial path over the inserted entity.
    pub path: KeyPath,
    pub set_fields: SmallVec<[FieldId; 4]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delete {
    pub label: String,
    pub path: KeyPath,
    pub eq_fields: SmallVec<[FieldId; 4]>,
    pub range_field: Option<FieldId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statement {
    Query(Query),
    Update(Update),
    Insert(Insert),
    Delete(Delete),
}

impl Statement {
    pub fn label(&self) -> &str {
        match self {
            Statement::Query(q) => &q.label,
            Statement::Update(u) => &u.label,
            Statement::Insert(i) => &i.label,
            Statement::Delete(d) => &d.label,
        }
    }

    pub fn path(&self) -> &KeyPath {
        match self {
            Statement::Query(q) => &q.path,
            Statement::Update(u) => &u.path,
            Statement::Insert(i) => &i.path,
            Statement::Delete(d) => &d.path,
        }
    }

    pub fn eq_fields(&self) -> &[FieldId] {
        match self {
            Statement::Query(q) => &q.eq_fields,
            Statement::Update(u) => &u.eq_fields,
            Statement::Insert(_) => &[],
            Statement::Delete(d) => &d.eq_fields,
        }
    }

    pub fn range_field(&self) -> Option<FieldId> {
        match self {
            Statement::Query(q) => q.range_field,
            Statement::Update(u) => u.range_field,
            Statement::Insert(_) => None,
            Statement::Delete(d) => d.range_field,
        }
    }

    pub fn order_fields(&self) -> &[FieldId] {
        match self {
            Statement::Query(q) => &q.order_fields,
            _ => &[],
        }
    }

    pub fn limit(&self) -> Option<u64> {
        match self {
            Statement::Query(q) => q.limit,
            _ => None,
        }
    }

    pub fn select_fields(&self) -> &[FieldId] {
        match self {
            Statement::Query(q) => &q.select,
            _ => &[],
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Statement::Query(_))
    }

    pub fn is_write(&self) -> bool {
        !self.is_read()
    }

    /// The entity whose rows this statement mutates, if any.
    pub fn mutated_entity(&self, schema: &Schema) -> Option<EntityId> {
        match self {
            Statement::Query(_) => None,
            Statement::Update(u) => Some(u.path.first_entity(schema)),
            Statement::Insert(i) => Some(i.entity),
            Statement::Delete(d) => Some(d.path.first_entity(schema)),
        }
    }

    /// Every field this statement references in any role. Writes include
    /// the mutated entity's identity key, which addresses the rows touched.
    pub fn all_fields(&self, schema: &Schema) -> BTreeSet<FieldId> {
        let mut out = BTreeSet::new();
        out.extend(self.select_fields().iter().copied());
        out.extend(self.eq_fields().iter().copied());
        out.extend(self.range_field());
        out.extend(self.order_fields().iter().copied());
        match self {
            Statement::Update(u) => out.extend(u.set_fields.iter().copied()),
            Statement::Insert(i) => out.extend(i.set_fields.iter().copied()),
            _ => {}
        }
        if let Some(entity) = self.mutated_entity(schema) {
            out.insert(schema.id_field(entity));
        }
        out
    }

    /// Reads injected before this mutation to fetch the rows needed to
    /// propagate it into `index`: one per direction of the index path away
    /// from the mutated entity, selecting the stored fields the statement
    /// itself does not supply. Deletes only need the entry key fields; an
    /// update must fetch old values of everything the index stores.
    pub fn support_queries(&self, schema: &Schema, index: &Index) -> Vec<Query> {
        if !self.modifies_index(schema, index) {
            return Vec::new();
        }
        let entity = self
            .mutated_entity(schema)
            .expect("only writes modify indexes");
        let entities = index.path().entities(schema);
        let Some(at) = entities.iter().position(|&e| e == entity) else {
            return Vec::new();
        };
        let id = schema.id_field(entity);

        let mut provided: BTreeSet<FieldId> = BTreeSet::from([id]);
        provided.extend(self.eq_fields().iter().copied());
        let wanted: BTreeSet<FieldId> = match self {
            Statement::Delete(_) => index
                .hash_fields()
                .iter()
                .chain(index.order_fields().iter())
                .copied()
                .collect(),
            Statement::Insert(i) => {
                provided.extend(i.set_fields.iter().copied());
                index.all_fields().collect()
            }
            _ => index.all_fields().collect(),
        };

        let len = index.path().len();
        let mut sides: Vec<KeyPath> = vec![index.path().subpath(schema, at, len)];
        if at > 0 {
            sides.push(index.path().subpath(schema, 0, at + 1).reversed(schema));
        }

        let mut claimed: BTreeSet<FieldId> = BTreeSet::new();
        let mut out = Vec::new();
        for (n, side) in sides.into_iter().enumerate() {
            let select: SmallVec<[FieldId; 4]> = wanted
                .iter()
                .copied()
                .filter(|f| !provided.contains(f) && !claimed.contains(f))
                .filter(|&f| side.find_field_parent(schema, f).is_some())
                .collect();
            if select.is_empty() {
                continue;
            }
            claimed.extend(select.iter().copied());
            let eq_on_side: SmallVec<[FieldId; 4]> = self
                .eq_fields()
                .iter()
                .copied()
                .filter(|&f| side.find_field_parent(schema, f).is_some())
                .collect();
            out.push(Query {
                label: format!("{}#support{}@{}", self.label(), n, &index.key()[..8]),
                path: side,
                select,
                eq_fields: if eq_on_side.is_empty() {
                    smallvec![id]
                } else {
                    eq_on_side
                },
                range_field: None,
                order_fields: SmallVec::new(),
                limit: None,
            });
        }
        out
    }

    /// True iff executing this statement requires maintenance work on
    /// `index`: the statement adds or removes rows of an entity the index
    /// materializes, or rewrites a field the index stores (rewriting a hash
    /// field moves rows across partitions, which is the same work).
    pub fn modifies_index(&self, schema: &Schema, index: &Index) -> bool {
        let Some(entity) = self.mutated_entity(schema) else {
            return false;
        };
        if !index.path().contains_entity(schema, entity) {
            return false;
        }
        match self {
            Statement::Update(u) => u
                .set_fields
                .iter()
                .any(|f| index.all_fields().any(|g| g == *f)),
            Statement::Insert(_) | Statement::Delete(_) => true,
            Statement::Query(_) => false,
        }
    }
}

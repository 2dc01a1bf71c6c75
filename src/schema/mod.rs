pub mod entity;
pub mod path;

pub use entity::{Arity, Entity, EntityId, Field, FieldId, FieldKind};
pub use path::KeyPath;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("duplicate entity '{name}'")]
    DuplicateEntity { name: String },
    #[error("duplicate field '{field}' on entity '{entity}'")]
    DuplicateField { entity: String, field: String },
    #[error("unknown entity '{name}'")]
    UnknownEntity { name: String },
    #[error("unknown field '{field}' on entity '{entity}'")]
    UnknownField { entity: String, field: String },
    #[error("entity '{entity}' declares no identity key")]
    MissingIdKey { entity: String },
    #[error("entity '{entity}' declares more than one identity key")]
    MultipleIdKeys { entity: String },
    #[error("path traverses '{field}' which is not an edge leaving '{entity}'")]
    BrokenPath { entity: String, field: String },
    #[error("cannot synthesize reverse key '{field}' on '{entity}': name taken")]
    ReverseNameClash { entity: String, field: String },
}

/// The conceptual entity-relationship schema: an arena of entity and field
/// nodes addressed by integer handles. Immutable once built; foreign-key
/// reverse handles are linked in a one-shot pass by `SchemaBuilder::finish`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    entities: Vec<Entity>,
    fields: Vec<Field>,
    by_name: HashMap<String, EntityId>,
}

impl Schema {
    pub fn entity(&self, id: EntityId) -> &Entity {
        &self.entities[id.index()]
    }

    pub fn field(&self, id: FieldId) -> &Field {
        &self.fields[id.index()]
    }

    pub fn entity_by_name(&self, name: &str) -> Option<EntityId> {
        self.by_name.get(name).copied()
    }

    pub fn field_by_name(&self, entity: EntityId, name: &str) -> Option<FieldId> {
        self.entity(entity)
            .fields
            .iter()
            .copied()
            .find(|&f| self.field(f).name == name)
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        (0..self.entities.len() as u32).map(EntityId)
    }

    pub fn id_field(&self, entity: EntityId) -> FieldId {
        self.entity(entity).id_field
    }

    pub fn foreign_keys(&self, entity: EntityId) -> impl Iterator<Item = FieldId> + '_ {
        self.entity(entity)
            .fields
            .iter()
            .copied()
            .filter(|&f| self.field(f).is_foreign_key())
    }

    pub fn scalar_fields(&self, entity: EntityId) -> impl Iterator<Item = FieldId> + '_ {
        self.entity(entity)
            .fields
            .iter()
            .copied()
            .filter(|&f| self.field(f).is_scalar())
    }

    /// Distinct-value estimate for a field: its declared cardinality, else
    /// the parent entity count, else 1.
    pub fn field_cardinality(&self, field: FieldId) -> u64 {
        let f = self.field(field);
        f.cardinality
            .unwrap_or_else(|| self.entity(f.parent).count)
            .max(1)
    }

    /// `Entity.field` rendering for messages and stable hashing.
    pub fn qualified_name(&self, field: FieldId) -> String {
        let f = self.field(field);
        format!("{}.{}", self.entity(f.parent).name, f.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldSpecKind {
    Int,
    Float,
    String { len: u32 },
    Date,
    Hash,
    IdKey,
    ForeignKey { target: String, arity: Arity },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldSpec {
    name: String,
    kind: FieldSpecKind,
    cardinality: Option<u64>,
}

/// Declarative description of one entity, consumed by `SchemaBuilder`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySpec {
    name: String,
    count: u64,
    fields: Vec<FieldSpec>,
}

impl EntitySpec {
    pub fn new(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            count,
            fields: Vec::new(),
        }
    }

    fn push(mut self, name: impl Into<String>, kind: FieldSpecKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            cardinality: None,
        });
        self
    }

    pub fn id_key(self, name: impl Into<String>) -> Self {
        self.push(name, FieldSpecKind::IdKey)
    }

    pub fn int(self, name: impl Into<String>) -> Self {
        self.push(name, FieldSpecKind::Int)
    }

    pub fn float(self, name: impl Into<String>) -> Self {
        self.push(name, FieldSpecKind::Float)
    }

    pub fn string(self, name: impl Into<String>, len: u32) -> Self {
        self.push(name, FieldSpecKind::String { len })
    }

    pub fn date(self, name: impl Into<String>) -> Self {
        self.push(name, FieldSpecKind::Date)
    }

    pub fn hashed(self, name: impl Into<String>) -> Self {
        self.push(name, FieldSpecKind::Hash)
    }

    pub fn foreign_key(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        arity: Arity,
    ) -> Self {
        self.push(
            name,
            FieldSpecKind::ForeignKey {
                target: target.into(),
                arity,
            },
        )
    }

    /// Overrides the distinct-value estimate of the most recently added
    /// field.
    pub fn with_cardinality(mut self, cardinality: u64) -> Self {
        if let Some(last) = self.fields.last_mut() {
            last.cardinality = Some(cardinality);
        }
        self
    }
}

/// Validating schema constructor. Collects entity declarations, then
/// `finish` allocates the arena, checks identity-key and name invariants,
/// resolves foreign-key targets, and links every reverse handle atomically
/// (pairing declared back-edges, synthesizing a hidden one when an edge has
/// no declared partner).
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    specs: Vec<EntitySpec>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, spec: EntitySpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn finish(self) -> Result<Schema, SchemaError> {
        let mut by_name = HashMap::new();
        for (i, spec) in self.specs.iter().enumerate() {
            if by_name.insert(spec.name.clone(), EntityId(i as u32)).is_some() {
                return Err(SchemaError::DuplicateEntity {
                    name: spec.name.clone(),
                });
            }
        }

        let placeholder = FieldId(u32::MAX);
        let mut entities = Vec::with_capacity(self.specs.len());
        let mut fields: Vec<Field> = Vec::new();

        for (i, spec) in self.specs.iter().enumerate() {
            let entity_id = EntityId(i as u32);
            let mut entity_fields: SmallVec<[FieldId; 8]> = SmallVec::new();
            let mut id_field = None;
            for fs in &spec.fields {
                if entity_fields
                    .iter()
                    .any(|&f| fields[f.index()].name == fs.name)
                {
                    return Err(SchemaError::DuplicateField {
                        entity: spec.name.clone(),
                        field: fs.name.clone(),
                    });
                }
                let kind = match &fs.kind {
                    FieldSpecKind::Int => FieldKind::Int,
                    FieldSpecKind::Float => FieldKind::Float,
                    FieldSpecKind::String { len } => FieldKind::String { len: *len },
                    FieldSpecKind::Date => FieldKind::Date,
                    FieldSpecKind::Hash => FieldKind::Hash,
                    FieldSpecKind::IdKey => FieldKind::IdKey,
                    FieldSpecKind::ForeignKey { target, arity } => {
                        let target =
                            by_name
                                .get(target)
                                .copied()
                                .ok_or_else(|| SchemaError::UnknownEntity {
                                    name: target.clone(),
                                })?;
                        FieldKind::ForeignKey {
                            target,
                            arity: *arity,
                            reverse: placeholder,
                        }
                    }
                };
                let field_id = FieldId(fields.len() as u32);
                if matches!(kind, FieldKind::IdKey) {
                    if id_field.is_some() {
                        return Err(SchemaError::MultipleIdKeys {
                            entity: spec.name.clone(),
                        });
                    }
                    id_field = Some(field_id);
                }
                fields.push(Field {
                    name: fs.name.clone(),
                    parent: entity_id,
                    kind,
                    cardinality: fs.cardinality,
                });
                entity_fields.push(field_id);
            }
            let id_field = id_field.ok_or_else(|| SchemaError::MissingIdKey {
                entity: spec.name.clone(),
            })?;
            entities.push(Entity {
                name: spec.name.clone(),
                count: spec.count,
                fields: entity_fields,
                id_field,
            });
        }

        // One-shot reverse resolution. Pair declared back-edges first, in
        // declaration order; any edge still unpaired gets a synthesized
        // hidden reverse so the graph stays bidirectional.
        let field_count = fields.len();
        for i in 0..field_count {
            let FieldKind::ForeignKey { target, reverse, .. } = fields[i].kind else {
                continue;
            };
            if reverse != placeholder {
                continue;
            }
            let source = fields[i].parent;
            let partner = entities[target.index()].fields.iter().copied().find(|&g| {
                g.index() != i
                    && matches!(
                        fields[g.index()].kind,
                        FieldKind::ForeignKey { target: t, reverse: r, .. }
                            if t == source && r == placeholder
                    )
            });
            let partner = match partner {
                Some(g) => g,
                None => {
                    let arity = match fields[i].kind {
                        FieldKind::ForeignKey { arity, .. } => arity.flipped(),
                        _ => unreachable!(),
                    };
                    let name = format!(
                        "{}_{}",
                        entities[source.index()].name.to_lowercase(),
                        fields[i].name
                    );
                    if entities[target.index()]
                        .fields
                        .iter()
                        .any(|&f| fields[f.index()].name == name)
                    {
                        return Err(SchemaError::ReverseNameClash {
                            entity: entities[target.index()].name.clone(),
                            field: name,
                        });
                    }
                    let g = FieldId(fields.len() as u32);
                    fields.push(Field {
                        name,
                        parent: target,
                        kind: FieldKind::ForeignKey {
                            target: source,
                            arity,
                            reverse: placeholder,
                        },
                        cardinality: None,
                    });
                    entities[target.index()].fields.push(g);
                    g
                }
            };
            // Both directions set together; neither half is ever observable
            // alone.
            let fi = FieldId(i as u32);
            if let FieldKind::ForeignKey { reverse, .. } = &mut fields[i].kind {
                *reverse = partner;
            }
            if let FieldKind::ForeignKey { reverse, .. } = &mut fields[partner.index()].kind {
                *reverse = fi;
            }
        }

        Ok(Schema {
            entities,
            fields,
            by_name,
        })
    }
}

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Arena handle for an entity node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EntityId(pub(crate) u32);

/// Arena handle for a field node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FieldId(pub(crate) u32);

impl EntityId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl FieldId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arity {
    One,
    Many,
}

impl Arity {
    pub fn flipped(self) -> Arity {
        match self {
            Arity::One => Arity::Many,
            Arity::Many => Arity::One,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Int,
    Float,
    String { len: u32 },
    Date,
    Hash,
    IdKey,
    ForeignKey {
        target: EntityId,
        arity: Arity,
        /// Handle of the paired foreign key on the target entity. Set
        /// exactly once by `SchemaBuilder::finish`; the two handles always
        /// point at each other.
        reverse: FieldId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub parent: EntityId,
    pub kind: FieldKind,
    /// Distinct-value estimate. `None` defaults to the parent entity count.
    pub cardinality: Option<u64>,
}

impl Field {
    /// Byte-size estimate used for index sizing.
    pub fn size(&self) -> u64 {
        match self.kind {
            FieldKind::Int
            | FieldKind::Float
            | FieldKind::Date
            | FieldKind::Hash
            | FieldKind::IdKey
            | FieldKind::ForeignKey { .. } => 8,
            FieldKind::String { len } => len as u64,
        }
    }

    pub fn is_foreign_key(&self) -> bool {
        matches!(self.kind, FieldKind::ForeignKey { .. })
    }

    pub fn is_id_key(&self) -> bool {
        matches!(self.kind, FieldKind::IdKey)
    }

    /// Scalar fields are everything a row physically stores: anything that
    /// is not a graph edge.
    pub fn is_scalar(&self) -> bool {
        !self.is_foreign_key()
    }

    pub fn foreign_key_target(&self) -> Option<EntityId> {
        match self.kind {
            FieldKind::ForeignKey { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn foreign_key_reverse(&self) -> Option<FieldId> {
        match self.kind {
            FieldKind::ForeignKey { reverse, .. } => Some(reverse),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    /// Expected row cardinality.
    pub count: u64,
    /// Fields in declaration order.
    pub fields: SmallVec<[FieldId; 8]>,
    /// The single identity key.
    pub id_field: FieldId,
}

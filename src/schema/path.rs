use crate::schema::entity::{EntityId, FieldId};
use crate::schema::{Schema, SchemaError};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Canonical traversal through the entity graph: an identity key followed
/// by foreign keys, each traversable from the entity reached so far.
/// Compared by value; two paths over the same fields are the same path.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct KeyPath {
    elems: SmallVec<[FieldId; 4]>,
}

impl KeyPath {
    /// The trivial path over one entity: just its identity key.
    pub fn anchored(schema: &Schema, entity: EntityId) -> KeyPath {
        KeyPath {
            elems: SmallVec::from_slice(&[schema.entity(entity).id_field]),
        }
    }

    /// Builds a path from `root` through the given foreign keys, checking
    /// that each key is an edge leaving the entity reached so far.
    pub fn build(schema: &Schema, root: EntityId, links: &[FieldId]) -> Result<KeyPath, SchemaError> {
        let mut path = KeyPath::anchored(schema, root);
        let mut at = root;
        for &link in links {
            let field = schema.field(link);
            if field.parent != at || !field.is_foreign_key() {
                return Err(SchemaError::BrokenPath {
                    entity: schema.entity(at).name.clone(),
                    field: field.name.clone(),
                });
            }
            at = field
                .foreign_key_target()
                .expect("checked foreign key above");
            path.elems.push(link);
        }
        Ok(path)
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.elems.iter().copied()
    }

    pub fn first_entity(&self, schema: &Schema) -> EntityId {
        schema.field(self.elems[0]).parent
    }

    pub fn last_entity(&self, schema: &Schema) -> EntityId {
        self.entity_at(schema, self.len() - 1)
    }

    /// Entity occupied at position `pos`.
    pub fn entity_at(&self, schema: &Schema, pos: usize) -> EntityId {
        if pos == 0 {
            self.first_entity(schema)
        } else {
            schema
                .field(self.elems[pos])
                .foreign_key_target()
                .expect("interior path elements are foreign keys")
        }
    }

    /// The entity at each position, in order.
    pub fn entities(&self, schema: &Schema) -> Vec<EntityId> {
        (0..self.len()).map(|pos| self.entity_at(schema, pos)).collect()
    }

    /// Iteration as (entity, incoming key) pairs. Position 0 pairs the root
    /// entity with its identity key.
    pub fn pairs(&self, schema: &Schema) -> Vec<(EntityId, FieldId)> {
        (0..self.len())
            .map(|pos| (self.entity_at(schema, pos), self.elems[pos]))
            .collect()
    }

    /// Position whose entity owns `field`, if any.
    pub fn find_field_parent(&self, schema: &Schema, field: FieldId) -> Option<usize> {
        let parent = schema.field(field).parent;
        (0..self.len()).find(|&pos| self.entity_at(schema, pos) == parent)
    }

    pub fn contains_entity(&self, schema: &Schema, entity: EntityId) -> bool {
        (0..self.len()).any(|pos| self.entity_at(schema, pos) == entity)
    }

    /// Contiguous sub-path covering positions `start..end`. A sub-path cut
    /// at an interior position is re-anchored at that entity's identity key
    /// so it is itself a well-formed path.
    pub fn subpath(&self, schema: &Schema, start: usize, end: usize) -> KeyPath {
        debug_assert!(start < end && end <= self.len());
        let mut elems = SmallVec::new();
        if start == 0 {
            elems.push(self.elems[0]);
        } else {
            elems.push(schema.entity(self.entity_at(schema, start)).id_field);
        }
        elems.extend_from_slice(&self.elems[start + 1..end]);
        KeyPath { elems }
    }

    /// The same traversal walked from the far end, using the reverse link
    /// of each foreign key.
    pub fn reversed(&self, schema: &Schema) -> KeyPath {
        let mut elems = SmallVec::new();
        elems.push(schema.entity(self.last_entity(schema)).id_field);
        for &link in self.elems[1..].iter().rev() {
            elems.push(
                schema
                    .field(link)
                    .foreign_key_reverse()
                    .expect("interior path elements are foreign keys"),
            );
        }
        KeyPath { elems }
    }

    /// Human-oriented rendering, e.g. `User.tweets`.
    pub fn render(&self, schema: &Schema) -> String {
        let mut out = schema.entity(self.first_entity(schema)).name.clone();
        for &link in &self.elems[1..] {
            out.push('.');
            out.push_str(&schema.field(link).name);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::schema::entity::Arity;
    use crate::schema::path::KeyPath;
    use crate::schema::{EntitySpec, SchemaBuilder};

    fn two_entity_schema() -> crate::schema::Schema {
        SchemaBuilder::new()
            .entity(
                EntitySpec::new("User", 10)
                    .id_key("id")
                    .string("name", 20)
                    .foreign_key("tweets", "Tweet", Arity::Many),
            )
            .entity(
                EntitySpec::new("Tweet", 100)
                    .id_key("id")
                    .string("body", 140)
                    .date("ts")
                    .foreign_key("author", "User", Arity::One),
            )
            .finish()
            .expect("schema")
    }

    #[test]
    fn build_validates_each_edge() {
        let schema = two_entity_schema();
        let user = schema.entity_by_name("User").unwrap();
        let tweets = schema.field_by_name(user, "tweets").unwrap();
        let path = KeyPath::build(&schema, user, &[tweets]).expect("path");
        assert_eq!(path.len(), 2);
        assert_eq!(path.render(&schema), "User.tweets");

        let tweet = schema.entity_by_name("Tweet").unwrap();
        let body = schema.field_by_name(tweet, "body").unwrap();
        // `body` is not an edge leaving User.
        assert!(KeyPath::build(&schema, user, &[body]).is_err());
    }

    #[test]
    fn subpath_reanchors_at_interior_identity() {
        let schema = two_entity_schema();
        let user = schema.entity_by_name("User").unwrap();
        let tweet = schema.entity_by_name("Tweet").unwrap();
        let tweets = schema.field_by_name(user, "tweets").unwrap();
        let path = KeyPath::build(&schema, user, &[tweets]).unwrap();

        let tail = path.subpath(&schema, 1, 2);
        assert_eq!(tail, KeyPath::anchored(&schema, tweet));
        let head = path.subpath(&schema, 0, 1);
        assert_eq!(head, KeyPath::anchored(&schema, user));
    }

    #[test]
    fn reversed_walks_the_reverse_links() {
        let schema = two_entity_schema();
        let user = schema.entity_by_name("User").unwrap();
        let tweet = schema.entity_by_name("Tweet").unwrap();
        let tweets = schema.field_by_name(user, "tweets").unwrap();
        let author = schema.field_by_name(tweet, "author").unwrap();

        let forward = KeyPath::build(&schema, user, &[tweets]).unwrap();
        let backward = KeyPath::build(&schema, tweet, &[author]).unwrap();
        assert_eq!(forward.reversed(&schema), backward);
        assert_eq!(backward.reversed(&schema), forward);
    }

    #[test]
    fn find_field_parent_locates_position() {
        let schema = two_entity_schema();
        let user = schema.entity_by_name("User").unwrap();
        let tweet = schema.entity_by_name("Tweet").unwrap();
        let tweets = schema.field_by_name(user, "tweets").unwrap();
        let path = KeyPath::build(&schema, user, &[tweets]).unwrap();

        let name = schema.field_by_name(user, "name").unwrap();
        let body = schema.field_by_name(tweet, "body").unwrap();
        assert_eq!(path.find_field_parent(&schema, name), Some(0));
        assert_eq!(path.find_field_parent(&schema, body), Some(1));
    }
}

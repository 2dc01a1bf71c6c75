use crate::schema::{Arity, EntitySpec, Schema, SchemaBuilder};
use crate::workload::parser::parse_statement;
use crate::workload::{Workload, WorkloadError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// One workload document: a name mapped to a schema section, textual
/// statements, and optional mix weightings. Unknown keys are ignored.
#[derive(Debug, Clone, Deserialize)]
struct WorkloadDoc {
    schema: SchemaDoc,
    #[serde(default)]
    statements: serde_yaml::Mapping,
    #[serde(default)]
    mix: Option<BTreeMap<String, BTreeMap<String, f64>>>,
}

#[derive(Debug, Clone, Deserialize)]
struct SchemaDoc {
    entities: serde_yaml::Mapping,
}

#[derive(Debug, Clone, Deserialize)]
struct EntityDoc {
    count: u64,
    #[serde(default)]
    fields: serde_yaml::Mapping,
}

fn string_key(value: &serde_yaml::Value, context: &str) -> Result<String, WorkloadError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| WorkloadError::Invalid {
            message: format!("{context} keys must be strings"),
        })
}

fn field_from_token(
    spec: EntitySpec,
    entity: &str,
    field: &str,
    token: &str,
) -> Result<EntitySpec, WorkloadError> {
    let token = token.trim();
    let unknown = || WorkloadError::UnknownFieldType {
        entity: entity.to_string(),
        field: field.to_string(),
        token: token.to_string(),
    };
    let spec = match token {
        "int" => spec.int(field),
        "float" => spec.float(field),
        "date" => spec.date(field),
        "hash" => spec.hashed(field),
        "id" => spec.id_key(field),
        _ if token.starts_with("string(") && token.ends_with(')') => {
            let len = token["string(".len()..token.len() - 1]
                .trim()
                .parse::<u32>()
                .map_err(|_| unknown())?;
            spec.string(field, len)
        }
        _ if token.starts_with("foreign_key(") && token.ends_with(')') => {
            let args = &token["foreign_key(".len()..token.len() - 1];
            let (target, arity) = args.split_once(',').ok_or_else(unknown)?;
            let arity = match arity.trim() {
                "one" => Arity::One,
                "many" => Arity::Many,
                _ => return Err(unknown()),
            };
            spec.foreign_key(field, target.trim(), arity)
        }
        _ => return Err(unknown()),
    };
    Ok(spec)
}

fn build_schema(doc: &SchemaDoc) -> Result<Schema, WorkloadError> {
    let mut builder = SchemaBuilder::new();
    for (name, body) in &doc.entities {
        let name = string_key(name, "entity")?;
        let entity: EntityDoc = serde_yaml::from_value(body.clone())?;
        let mut spec = EntitySpec::new(&name, entity.count);
        for (field, token) in &entity.fields {
            let field = string_key(field, "field")?;
            let token = token.as_str().ok_or_else(|| WorkloadError::Invalid {
                message: format!("field type for '{name}.{field}' must be a string"),
            })?;
            spec = field_from_token(spec, &name, &field, token)?;
        }
        builder = builder.entity(spec);
    }
    Ok(builder.finish()?)
}

/// Loads a workload document from YAML text. Returns the workload name,
/// the schema, and the parsed, mix-weighted workload.
pub fn load_str(text: &str) -> Result<(String, Schema, Workload), WorkloadError> {
    let doc: serde_yaml::Mapping = serde_yaml::from_str(text)?;
    let (name, body) = doc.into_iter().next().ok_or(WorkloadError::EmptyDocument)?;
    let name = string_key(&name, "workload")?;
    let doc: WorkloadDoc = serde_yaml::from_value(body)?;

    let schema = build_schema(&doc.schema)?;

    let mut statements = Vec::with_capacity(doc.statements.len());
    for (label, text) in &doc.statements {
        let label = string_key(label, "statement")?;
        let text = text.as_str().ok_or_else(|| WorkloadError::Invalid {
            message: format!("statement '{label}' must be a string"),
        })?;
        let parsed = parse_statement(&schema, &label, text).map_err(|source| {
            WorkloadError::Statement {
                label: label.clone(),
                source,
            }
        })?;
        statements.push(parsed);
    }

    let workload = match doc.mix {
        Some(mixes) if !mixes.is_empty() => Workload::with_mixes(statements, mixes)?,
        _ => Workload::new(statements),
    };
    Ok((name, schema, workload))
}

pub fn load_path(path: impl AsRef<Path>) -> Result<(String, Schema, Workload), WorkloadError> {
    let text = std::fs::read_to_string(path)?;
    load_str(&text)
}

#[cfg(test)]
mod tests {
    use super::load_str;
    use crate::workload::WorkloadError;

    const DOC: &str = r#"
feed:
  schema:
    entities:
      User:
        count: 10
        fields:
          id: id
          name: string(20)
      Tweet:
        count: 100
        fields:
          id: id
          body: string(140)
          ts: date
          author: foreign_key(User, one)
  statements:
    by_name: SELECT Tweet.body FROM Tweet.author WHERE User.name = ? ORDER BY Tweet.ts LIMIT 10
    touch_body: UPDATE Tweet SET body = ? WHERE Tweet.id = ?
  mix:
    default:
      by_name: 4.0
      touch_body: 1.0
    write_heavy:
      by_name: 1.0
      touch_body: 9.0
  ignored_section: 42
"#;

    #[test]
    fn loads_schema_statements_and_mixes() {
        let (name, schema, workload) = load_str(DOC).expect("load");
        assert_eq!(name, "feed");
        assert!(schema.entity_by_name("User").is_some());
        assert_eq!(workload.statements().len(), 2);
        assert_eq!(workload.frequency(None, "by_name"), 4.0);
        assert_eq!(workload.frequency(Some("write_heavy"), "touch_body"), 9.0);
    }

    #[test]
    fn missing_mix_section_defaults_to_uniform_weights() {
        let doc = r#"
tiny:
  schema:
    entities:
      User:
        count: 10
        fields:
          id: id
          name: string(20)
  statements:
    lookup: SELECT name FROM User WHERE id = ?
"#;
        let (_, _, workload) = load_str(doc).expect("load");
        assert_eq!(workload.frequency(None, "lookup"), 1.0);
    }

    #[test]
    fn bad_field_token_is_reported() {
        let doc = r#"
broken:
  schema:
    entities:
      User:
        count: 10
        fields:
          id: id
          name: varchar(20)
"#;
        let err = load_str(doc).expect_err("bad token");
        assert!(matches!(err, WorkloadError::UnknownFieldType { .. }));
    }

    #[test]
    fn statement_errors_carry_the_label() {
        let doc = r#"
broken:
  schema:
    entities:
      User:
        count: 10
        fields:
          id: id
  statements:
    bad: SELECT nothing FROM Nowhere
"#;
        let err = load_str(doc).expect_err("bad statement");
        let WorkloadError::Statement { label, .. } = err else {
            panic!("expected statement error");
        };
        assert_eq!(label, "bad");
    }
}

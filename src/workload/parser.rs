use crate::schema::{EntityId, FieldId, KeyPath, Schema};
use crate::workload::statement::{
    ConditionOp, Delete, Insert, Query, Statement, Update,
};
use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case};
use nom::character::complete::{alpha1, alphanumeric1, digit1, multispace0, multispace1};
use nom::combinator::{map, opt, recognize};
use nom::multi::{many0, separated_list1};
use nom::sequence::{pair, preceded, tuple};
use nom::{IResult, Offset};
use thiserror::Error;

/// A textual statement was rejected. `offset` is the byte position of the
/// offending token in the statement string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("statement parse error at byte {offset}: {message}")]
pub struct StatementParseError {
    pub message: String,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy)]
struct RawField<'a> {
    entity: Option<&'a str>,
    name: &'a str,
}

#[derive(Debug, Clone)]
struct RawPath<'a> {
    root: &'a str,
    links: Vec<&'a str>,
}

#[derive(Debug, Clone, Copy)]
struct RawCond<'a> {
    field: RawField<'a>,
    op: ConditionOp,
}

#[derive(Debug, Clone)]
enum RawStatement<'a> {
    Query {
        select: Vec<RawField<'a>>,
        path: RawPath<'a>,
        conds: Vec<RawCond<'a>>,
        order: Vec<RawField<'a>>,
        limit: Option<u64>,
    },
    Update {
        entity: &'a str,
        path: Option<RawPath<'a>>,
        set: Vec<RawField<'a>>,
        conds: Vec<RawCond<'a>>,
    },
    Insert {
        entity: &'a str,
        set: Vec<RawField<'a>>,
    },
    Delete {
        entity: &'a str,
        path: Option<RawPath<'a>>,
        conds: Vec<RawCond<'a>>,
    },
}

fn ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn field_ref(input: &str) -> IResult<&str, RawField<'_>> {
    let (input, first) = ident(input)?;
    let (input, second) = opt(preceded(tag("."), ident))(input)?;
    let raw = match second {
        Some(name) => RawField {
            entity: Some(first),
            name,
        },
        None => RawField {
            entity: None,
            name: first,
        },
    };
    Ok((input, raw))
}

fn path_ref(input: &str) -> IResult<&str, RawPath<'_>> {
    let (input, root) = ident(input)?;
    let (input, links) = many0(preceded(tag("."), ident))(input)?;
    Ok((input, RawPath { root, links }))
}

fn comma(input: &str) -> IResult<&str, ()> {
    let (input, _) = tuple((multispace0, tag(","), multispace0))(input)?;
    Ok((input, ()))
}

fn field_list(input: &str) -> IResult<&str, Vec<RawField<'_>>> {
    separated_list1(comma, field_ref)(input)
}

fn condition_op(input: &str) -> IResult<&str, ConditionOp> {
    alt((
        map(tag("<="), |_| ConditionOp::Lte),
        map(tag(">="), |_| ConditionOp::Gte),
        map(tag("<"), |_| ConditionOp::Lt),
        map(tag(">"), |_| ConditionOp::Gt),
        map(tag("="), |_| ConditionOp::Eq),
    ))(input)
}

fn condition(input: &str) -> IResult<&str, RawCond<'_>> {
    let (input, field) = field_ref(input)?;
    let (input, _) = multispace0(input)?;
    let (input, op) = condition_op(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = tag("?")(input)?;
    Ok((input, RawCond { field, op }))
}

fn and_sep(input: &str) -> IResult<&str, ()> {
    let (input, _) = tuple((multispace1, tag_no_case("AND"), multispace1))(input)?;
    Ok((input, ()))
}

fn where_clause(input: &str) -> IResult<&str, Vec<RawCond<'_>>> {
    let (input, _) = tuple((multispace1, tag_no_case("WHERE"), multispace1))(input)?;
    separated_list1(and_sep, condition)(input)
}

fn assignment(input: &str) -> IResult<&str, RawField<'_>> {
    let (input, field) = field_ref(input)?;
    let (input, _) = tuple((multispace0, tag("="), multispace0, tag("?")))(input)?;
    Ok((input, field))
}

fn query(input: &str) -> IResult<&str, RawStatement<'_>> {
    let (input, _) = tag_no_case("SELECT")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, select) = field_list(input)?;
    let (input, _) = tuple((multispace1, tag_no_case("FROM"), multispace1))(input)?;
    let (input, path) = path_ref(input)?;
    let (input, conds) = opt(where_clause)(input)?;
    let (input, order) = opt(preceded(
        tuple((
            multispace1,
            tag_no_case("ORDER"),
            multispace1,
            tag_no_case("BY"),
            multispace1,
        )),
        field_list,
    ))(input)?;
    let (input, limit) = opt(preceded(
        tuple((multispace1, tag_no_case("LIMIT"), multispace1)),
        map(digit1, |d: &str| d.parse::<u64>().unwrap_or(u64::MAX)),
    ))(input)?;
    Ok((
        input,
        RawStatement::Query {
            select,
            path,
            conds: conds.unwrap_or_default(),
            order: order.unwrap_or_default(),
            limit,
        },
    ))
}

fn from_path(input: &str) -> IResult<&str, RawPath<'_>> {
    preceded(
        tuple((multispace1, tag_no_case("FROM"), multispace1)),
        path_ref,
    )(input)
}

fn update(input: &str) -> IResult<&str, RawStatement<'_>> {
    let (input, _) = tag_no_case("UPDATE")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, entity) = ident(input)?;
    let (input, path) = opt(from_path)(input)?;
    let (input, _) = tuple((multispace1, tag_no_case("SET"), multispace1))(input)?;
    let (input, set) = separated_list1(comma, assignment)(input)?;
    let (input, conds) = opt(where_clause)(input)?;
    Ok((
        input,
        RawStatement::Update {
            entity,
            path,
            set,
            conds: conds.unwrap_or_default(),
        },
    ))
}

fn insert(input: &str) -> IResult<&str, RawStatement<'_>> {
    let (input, _) = tag_no_case("INSERT")(input)?;
    let (input, _) = tuple((multispace1, tag_no_case("INTO"), multispace1))(input)?;
    let (input, entity) = ident(input)?;
    let (input, _) = tuple((multispace1, tag_no_case("SET"), multispace1))(input)?;
    let (input, set) = separated_list1(comma, assignment)(input)?;
    Ok((input, RawStatement::Insert { entity, set }))
}

fn delete(input: &str) -> IResult<&str, RawStatement<'_>> {
    let (input, _) = tag_no_case("DELETE")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, entity) = ident(input)?;
    let (input, path) = opt(from_path)(input)?;
    let (input, conds) = opt(where_clause)(input)?;
    Ok((
        input,
        RawStatement::Delete {
            entity,
            path,
            conds: conds.unwrap_or_default(),
        },
    ))
}

fn statement(input: &str) -> IResult<&str, RawStatement<'_>> {
    let (input, _) = multispace0(input)?;
    let (input, raw) = alt((query, update, insert, delete))(input)?;
    let (input, _) = multispace0(input)?;
    Ok((input, raw))
}

fn err_at(full: &str, token: &str, message: impl Into<String>) -> StatementParseError {
    StatementParseError {
        message: message.into(),
        offset: full.offset(token),
    }
}

struct Resolver<'a> {
    schema: &'a Schema,
    full: &'a str,
}

impl<'a> Resolver<'a> {
    fn path(&self, raw: &RawPath<'a>) -> Result<KeyPath, StatementParseError> {
        let root = self
            .schema
            .entity_by_name(raw.root)
            .ok_or_else(|| err_at(self.full, raw.root, format!("unknown entity '{}'", raw.root)))?;
        let mut at = root;
        let mut links = Vec::with_capacity(raw.links.len());
        for &link in &raw.links {
            let field = self.schema.field_by_name(at, link).ok_or_else(|| {
                err_at(
                    self.full,
                    link,
                    format!(
                        "'{}' is not a field of '{}'",
                        link,
                        self.schema.entity(at).name
                    ),
                )
            })?;
            let target = self.schema.field(field).foreign_key_target().ok_or_else(|| {
                err_at(
                    self.full,
                    link,
                    format!(
                        "'{}' is not a foreign key of '{}'",
                        link,
                        self.schema.entity(at).name
                    ),
                )
            })?;
            links.push(field);
            at = target;
        }
        KeyPath::build(self.schema, root, &links)
            .map_err(|e| err_at(self.full, raw.root, e.to_string()))
    }

    fn field_on_path(
        &self,
        raw: RawField<'a>,
        path: &KeyPath,
    ) -> Result<FieldId, StatementParseError> {
        if let Some(entity_name) = raw.entity {
            let entity = self.schema.entity_by_name(entity_name).ok_or_else(|| {
                err_at(
                    self.full,
                    entity_name,
                    format!("unknown entity '{entity_name}'"),
                )
            })?;
            if !path.contains_entity(self.schema, entity) {
                return Err(err_at(
                    self.full,
                    entity_name,
                    format!("entity '{entity_name}' is not on the statement path"),
                ));
            }
            return self.schema.field_by_name(entity, raw.name).ok_or_else(|| {
                err_at(
                    self.full,
                    raw.name,
                    format!("'{}' is not a field of '{}'", raw.name, entity_name),
                )
            });
        }
        // Unqualified: the name must be owned by exactly one path entity.
        let mut found = None;
        for entity in path.entities(self.schema) {
            if let Some(field) = self.schema.field_by_name(entity, raw.name) {
                if found.is_some() {
                    return Err(err_at(
                        self.full,
                        raw.name,
                        format!("field '{}' is ambiguous on this path", raw.name),
                    ));
                }
                found = Some(field);
            }
        }
        found.ok_or_else(|| {
            err_at(
                self.full,
                raw.name,
                format!("no entity on the path owns a field '{}'", raw.name),
            )
        })
    }

    fn split_conditions(
        &self,
        conds: &[RawCond<'a>],
        path: &KeyPath,
    ) -> Result<(smallvec::SmallVec<[FieldId; 4]>, Option<FieldId>), StatementParseError> {
        let mut eq = smallvec::SmallVec::new();
        let mut range = None;
        for cond in conds {
            let field = self.field_on_path(cond.field, path)?;
            if cond.op.is_equality() {
                if !eq.contains(&field) {
                    eq.push(field);
                }
            } else if range.is_some() && range != Some(field) {
                return Err(err_at(
                    self.full,
                    cond.field.name,
                    "a statement may carry at most one range condition",
                ));
            } else {
                range = Some(field);
            }
        }
        Ok((eq, range))
    }

    fn entity_anchor(
        &self,
        name: &'a str,
        path: Option<&RawPath<'a>>,
    ) -> Result<(EntityId, KeyPath), StatementParseError> {
        let entity = self
            .schema
            .entity_by_name(name)
            .ok_or_else(|| err_at(self.full, name, format!("unknown entity '{name}'")))?;
        let path = match path {
            Some(raw) => {
                let path = self.path(raw)?;
                if path.first_entity(self.schema) != entity {
                    return Err(err_at(
                        self.full,
                        raw.root,
                        format!("path must start at the mutated entity '{name}'"),
                    ));
                }
                path
            }
            None => KeyPath::anchored(self.schema, entity),
        };
        Ok((entity, path))
    }
}

/// Parses and resolves one textual statement against `schema`.
pub fn parse_statement(
    schema: &Schema,
    label: impl Into<String>,
    text: &str,
) -> Result<Statement, StatementParseError> {
    let (rest, raw) = statement(text).map_err(|e| match e {
        nom::Err::Error(e) | nom::Err::Failure(e) => StatementParseError {
            message: format!("expected {:?}", e.code),
            offset: text.offset(e.input),
        },
        nom::Err::Incomplete(_) => StatementParseError {
            message: "incomplete statement".into(),
            offset: text.len(),
        },
    })?;
    if !rest.is_empty() {
        return Err(StatementParseError {
            message: format!("trailing input '{rest}'"),
            offset: text.offset(rest),
        });
    }

    let label = label.into();
    let r = Resolver { schema, full: text };
    match raw {
        RawStatement::Query {
            select,
            path,
            conds,
            order,
            limit,
        } => {
            let path = r.path(&path)?;
            let select = select
                .iter()
                .map(|&f| r.field_on_path(f, &path))
                .collect::<Result<_, _>>()?;
            let order = order
                .iter()
                .map(|&f| r.field_on_path(f, &path))
                .collect::<Result<_, _>>()?;
            let (eq_fields, range_field) = r.split_conditions(&conds, &path)?;
            Ok(Statement::Query(Query {
                label,
                path,
                select,
                eq_fields,
                range_field,
                order_fields: order,
                limit,
            }))
        }
        RawStatement::Update {
            entity,
            path,
            set,
            conds,
        } => {
            let (_, path) = r.entity_anchor(entity, path.as_ref())?;
            let mutated = path.first_entity(schema);
            let anchored = KeyPath::anchored(schema, mutated);
            let set = set
                .iter()
                .map(|&f| r.field_on_path(f, &anchored))
                .collect::<Result<_, _>>()?;
            let (eq_fields, range_field) = r.split_conditions(&conds, &path)?;
            Ok(Statement::Update(Update {
                label,
                path,
                set_fields: set,
                eq_fields,
                range_field,
            }))
        }
        RawStatement::Insert { entity, set } => {
            let (entity, path) = r.entity_anchor(entity, None)?;
            let set = set
                .iter()
                .map(|&f| r.field_on_path(f, &path))
                .collect::<Result<_, _>>()?;
            Ok(Statement::Insert(Insert {
                label,
                entity,
                path,
                set_fields: set,
            }))
        }
        RawStatement::Delete {
            entity,
            path,
            conds,
        } => {
            let (_, path) = r.entity_anchor(entity, path.as_ref())?;
            let (eq_fields, range_field) = r.split_conditions(&conds, &path)?;
            Ok(Statement::Delete(Delete {
                label,
                path,
                eq_fields,
                range_field,
            }))
        }
    }
}

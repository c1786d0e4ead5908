//! Field selections controlling hydration depth.
//!
//! Syntax, comma separated:
//!
//! ```text
//! name                       scalar field
//! children.name              one relationship hop, then a scalar
//! friends.{name,age}         grouped sub-selection
//! children(5).name           at most five related nodes
//! children(10;max)           skip ten, no limit
//! *                          every scalar plus eager relationships
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::{OgmError, Result};
use crate::metadata::{EntityDescriptor, Registry};

pub const ALL_FIELDS: &str = "*";

/// One selected field and its nested selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryField {
    pub name: String,
    pub skip: usize,
    pub limit: Option<usize>,
    pub sub_fields: FieldList,
}

impl QueryField {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn window(mut self, skip: usize, limit: Option<usize>) -> Self {
        self.skip = skip;
        self.limit = limit;
        self
    }

    pub fn with(mut self, sub: QueryField) -> Self {
        self.sub_fields.insert(sub);
        self
    }

    fn has_window(&self) -> bool {
        self.skip > 0 || self.limit.is_some()
    }

    fn merge(&mut self, other: QueryField) {
        if other.has_window() {
            self.skip = other.skip;
            self.limit = other.limit;
        }
        for sub in other.sub_fields.fields.into_values() {
            self.sub_fields.insert(sub);
        }
    }

    fn write_window(&self, out: &mut String) {
        match (self.skip, self.limit) {
            (0, None) => {}
            (0, Some(limit)) => out.push_str(&format!("({limit})")),
            (skip, Some(limit)) => out.push_str(&format!("({skip};{limit})")),
            (skip, None) => out.push_str(&format!("({skip};max)")),
        }
    }
}

/// An immutable set of selection paths keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldList {
    fields: BTreeMap<String, QueryField>,
}

impl FieldList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(input: &str) -> Result<Self> {
        Parser::new(input).parse()
    }

    /// Build from dotted paths without windows or groups.
    pub fn from_paths<I, S>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        for path in paths {
            let path = path.as_ref();
            let mut segments = path.split('.').rev();
            let leaf = segments
                .next()
                .filter(|s| is_identifier(s) || *s == ALL_FIELDS)
                .ok_or_else(|| OgmError::query_parse(path, "empty path"))?;
            let mut field = QueryField::new(leaf);
            for segment in segments {
                if !is_identifier(segment) {
                    return Err(OgmError::query_parse(path, format!("illegal segment \"{segment}\"")));
                }
                field = QueryField::new(segment).with(field);
            }
            list.insert(field);
        }
        Ok(list)
    }

    pub fn from_fields(fields: impl IntoIterator<Item = QueryField>) -> Self {
        let mut list = Self::new();
        for field in fields {
            list.insert(field);
        }
        list
    }

    /// Programmatic builder: `FieldList::builder().field("name").path("children.name")`.
    pub fn builder() -> FieldListBuilder {
        FieldListBuilder::default()
    }

    pub fn all() -> Self {
        Self::from_fields([QueryField::new(ALL_FIELDS)])
    }

    fn insert(&mut self, field: QueryField) {
        match self.fields.get_mut(&field.name) {
            Some(existing) => existing.merge(field),
            None => {
                self.fields.insert(field.name.clone(), field);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn includes_all(&self) -> bool {
        self.contains(ALL_FIELDS)
    }

    pub fn get(&self, name: &str) -> Option<&QueryField> {
        self.fields.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryField> {
        self.fields.values()
    }

    /// Every selection path, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_paths("", &mut out);
        out.sort();
        out
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        for field in self.fields.values() {
            let mut path = format!("{prefix}{}", field.name);
            field.write_window(&mut path);
            if field.sub_fields.is_empty() {
                out.push(path);
            } else {
                path.push('.');
                field.sub_fields.collect_paths(&path, out);
            }
        }
    }

    /// Check every segment against the descriptor of the type reached so far.
    pub fn resolve(&self, descriptor: &EntityDescriptor, registry: &Registry) -> Result<()> {
        self.resolve_at(descriptor, registry, "")
    }

    fn resolve_at(&self, descriptor: &EntityDescriptor, registry: &Registry, prefix: &str) -> Result<()> {
        for field in self.fields.values() {
            let path = format!("{prefix}{}", field.name);
            if field.name == ALL_FIELDS {
                if !field.sub_fields.is_empty() || field.has_window() {
                    return Err(OgmError::invalid_path(descriptor.label, path));
                }
                continue;
            }
            let Some(declared) = descriptor.field(&field.name) else {
                return Err(OgmError::invalid_path(descriptor.label, path));
            };
            if !declared.is_relationship() {
                if !field.sub_fields.is_empty() || field.has_window() {
                    return Err(OgmError::invalid_path(descriptor.label, path));
                }
                continue;
            }
            if let Some(target) = declared.target(registry) {
                let target = target?;
                field.sub_fields.resolve_at(&target, registry, &format!("{path}."))?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for FieldList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.paths().join(","))
    }
}

impl FromStr for FieldList {
    type Err = OgmError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for FieldList {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Default)]
pub struct FieldListBuilder {
    list: FieldList,
    error: Option<OgmError>,
}

impl FieldListBuilder {
    pub fn field(mut self, name: &str) -> Self {
        self.list.insert(QueryField::new(name));
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        match FieldList::from_paths([path]) {
            Ok(parsed) => {
                for field in parsed.fields.into_values() {
                    self.list.insert(field);
                }
            }
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
        self
    }

    pub fn nested(mut self, field: QueryField) -> Self {
        self.list.insert(field);
        self
    }

    pub fn build(self) -> Result<FieldList> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.list),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ── Parser ────────────────────────────────────────────────────────

struct Parser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().filter(|c| !c.is_whitespace()).collect(),
            pos: 0,
        }
    }

    fn parse(mut self) -> Result<FieldList> {
        if self.chars.is_empty() {
            return Ok(FieldList::new());
        }
        let list = self.list()?;
        match self.peek() {
            None => Ok(list),
            Some('}') => Err(self.error("unbalanced '}'")),
            Some(c) => Err(self.error(format!("unexpected '{c}'"))),
        }
    }

    fn list(&mut self) -> Result<FieldList> {
        let mut list = FieldList::new();
        loop {
            list.insert(self.item()?);
            if self.peek() == Some(',') {
                self.pos += 1;
            } else {
                return Ok(list);
            }
        }
    }

    fn item(&mut self) -> Result<QueryField> {
        if self.peek() == Some('*') {
            self.pos += 1;
            return Ok(QueryField::new(ALL_FIELDS));
        }

        let name = self.identifier()?;
        let mut field = QueryField::new(&name);
        if self.peek() == Some('(') {
            let (skip, limit) = self.window()?;
            field = field.window(skip, limit);
        }

        if self.peek() == Some('.') {
            self.pos += 1;
            if self.peek() == Some('{') {
                self.pos += 1;
                field.sub_fields = self.list()?;
                if self.peek() != Some('}') {
                    return Err(self.error("missing '}'"));
                }
                self.pos += 1;
            } else {
                field.sub_fields.insert(self.item()?);
            }
        }
        Ok(field)
    }

    fn identifier(&mut self) -> Result<String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        if !is_identifier(&name) {
            return Err(match self.peek() {
                Some(c) if name.is_empty() => self.error(format!("expected field name, found '{c}'")),
                None if name.is_empty() => self.error("expected field name"),
                _ => self.error(format!("illegal field name \"{name}\"")),
            });
        }
        Ok(name)
    }

    fn window(&mut self) -> Result<(usize, Option<usize>)> {
        self.pos += 1;
        let first = self.bound()?;
        let window = match self.peek() {
            Some(';') => {
                self.pos += 1;
                let skip = first.ok_or_else(|| self.error("skip must be a number"))?;
                (skip, self.bound()?)
            }
            _ => (0, first),
        };
        if self.peek() != Some(')') {
            return Err(self.error("missing ')'"));
        }
        self.pos += 1;
        Ok(window)
    }

    /// A number, or `max` for no bound.
    fn bound(&mut self) -> Result<Option<usize>> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric()) {
            self.pos += 1;
        }
        let token: String = self.chars[start..self.pos].iter().collect();
        if token == "max" {
            return Ok(None);
        }
        token
            .parse::<usize>()
            .map(Some)
            .map_err(|_| self.error(format!("bad window bound \"{token}\"")))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn error(&self, reason: impl Into<String>) -> OgmError {
        OgmError::query_parse(self.input, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::tests::Person;
    use crate::error::ErrorKind;

    #[test]
    fn parse_round_trips() {
        let list = FieldList::parse("name,children.name").unwrap();
        assert_eq!(list.to_string(), "children.name,name");
        assert_eq!(FieldList::parse(&list.to_string()).unwrap(), list);
        assert!(list.get("children").unwrap().sub_fields.contains("name"));
    }

    #[test]
    fn groups_merge_with_paths() {
        let grouped = FieldList::parse("pets.{name}, children.{name,age}").unwrap();
        let dotted = FieldList::parse("children.age,children.name,pets.name").unwrap();
        assert_eq!(grouped, dotted);
        assert_eq!(grouped.paths(), vec!["children.age", "children.name", "pets.name"]);
    }

    #[test]
    fn windows_parse_and_print() {
        let list = FieldList::parse("children(5).name,pets(2;max),spouse(1;3)").unwrap();
        let children = list.get("children").unwrap();
        assert_eq!((children.skip, children.limit), (0, Some(5)));
        let pets = list.get("pets").unwrap();
        assert_eq!((pets.skip, pets.limit), (2, None));
        assert_eq!(list.to_string(), "children(5).name,pets(2;max),spouse(1;3)");
    }

    #[test]
    fn malformed_input_is_a_parse_error() {
        for input in ["name,", "children.{name", "name}", "children(x)", "children(1;2", "na-me", "1abc"] {
            let err = FieldList::parse(input).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::QueryParse, "{input}");
        }
        assert!(FieldList::parse("").unwrap().is_empty());
    }

    #[test]
    fn builder_matches_parser() {
        let built = FieldList::builder()
            .field("name")
            .path("children.name")
            .build()
            .unwrap();
        assert_eq!(built, FieldList::parse("name,children.name").unwrap());
        assert!(FieldList::builder().path("children..name").build().is_err());
    }

    #[test]
    fn resolve_checks_each_hop() {
        let registry = Registry::new();
        let person = registry.describe::<Person>().unwrap();

        FieldList::parse("name,children.pets.name,*").unwrap().resolve(&person, &registry).unwrap();

        for bad in ["nickname", "children.nickname", "name.first", "age(3)", "pets.owner"] {
            let err = FieldList::parse(bad).unwrap().resolve(&person, &registry).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidFieldPath, "{bad}");
        }
    }
}

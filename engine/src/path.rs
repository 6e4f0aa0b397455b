//! Entity references and the path grammar.
//!
//! A path names either a whole collection (`/student`) or a single row in it.
//! Four row notations are accepted and normalize to the same reference:
//!
//! - `/student/1`
//! - `/student(1)`
//! - `/student('1')`
//! - `/student("1")`
//!
//! A third segment addresses a single field of the row (`/student/1/name`),
//! and anything after `?` is kept verbatim as the query string.

use crate::{error::Result, CollectionName, Error, RecordId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A parsed reference to a collection, a row, or a field of a row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    /// Collection name; empty when the path was empty or malformed
    pub collection: CollectionName,
    /// Row id; `None` for collection-level references
    pub id: Option<RecordId>,
    /// Field of the row, when the path had a third segment
    pub field: Option<String>,
    /// Canonical `/collection[/id]` form
    pub raw_path: String,
    /// Query string without the leading `?`
    pub query: String,
}

impl EntityRef {
    /// Reference to a whole collection.
    pub fn collection(name: impl Into<CollectionName>) -> Self {
        let collection = name.into();
        if !is_valid_segment(&collection) {
            return Self::default();
        }
        Self {
            raw_path: format!("/{}", collection),
            collection,
            ..Self::default()
        }
    }

    /// Reference to a single row.
    pub fn row(collection: impl Into<CollectionName>, id: impl Into<RecordId>) -> Self {
        let mut r = Self::collection(collection);
        if r.is_empty() {
            return r;
        }
        let id = id.into();
        if !id.is_empty() {
            r.raw_path = format!("/{}/{}", r.collection, id);
            r.id = Some(id);
        }
        r
    }

    /// True when the reference names nothing (empty or malformed input).
    pub fn is_empty(&self) -> bool {
        self.collection.is_empty()
    }

    /// True when the reference names a single row (or a field of one).
    pub fn is_row(&self) -> bool {
        !self.is_empty() && self.id.is_some()
    }

    /// True when the reference names a whole collection.
    pub fn is_collection(&self) -> bool {
        !self.is_empty() && self.id.is_none()
    }

    /// Require a non-empty collection.
    pub fn require_collection(&self) -> Result<&str> {
        if self.is_empty() {
            return Err(Error::InvalidPath(self.raw_path.clone()));
        }
        Ok(&self.collection)
    }

    /// Require a row id.
    pub fn require_id(&self) -> Result<&str> {
        self.require_collection()?;
        self.id
            .as_deref()
            .ok_or_else(|| Error::MissingId(self.raw_path.clone()))
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw_path)?;
        if let Some(field) = &self.field {
            write!(f, "/{}", field)?;
        }
        if !self.query.is_empty() {
            write!(f, "?{}", self.query)?;
        }
        Ok(())
    }
}

/// Parse a path into an [`EntityRef`].
///
/// Never fails: malformed input yields a reference with an empty collection,
/// which callers treat as a no-op.
pub fn parse(path: &str) -> EntityRef {
    let (path_part, query) = match path.split_once('?') {
        Some((p, q)) => (p, q),
        None => (path, ""),
    };

    let normalized = match normalize_brackets(path_part.trim()) {
        Some(n) => n,
        None => return EntityRef::default(),
    };

    let mut segments = normalized.split('/').filter(|s| !s.is_empty());

    let collection = match segments.next() {
        Some(c) if is_valid_segment(c) => c,
        _ => return EntityRef::default(),
    };

    let mut entity = EntityRef::collection(collection);
    if let Some(id) = segments.next() {
        if !is_valid_segment(id) {
            return EntityRef::default();
        }
        entity = EntityRef::row(collection, id);
        if let Some(field) = segments.next() {
            entity.field = Some(field.to_string());
        }
    }
    entity.query = query.to_string();
    entity
}

/// Rewrite `/coll(id)`, `/coll('id')` and `/coll("id")` as `/coll/id`.
fn normalize_brackets(path: &str) -> Option<String> {
    let Some(open) = path.find('(') else {
        return if path.contains(')') {
            None
        } else {
            Some(path.to_string())
        };
    };

    let close = open + path[open..].find(')')?;
    let inner = unquote(path[open + 1..close].trim())?;
    let rest = &path[close + 1..];
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    if rest.contains('(') || rest.contains(')') {
        return None;
    }

    Some(format!("{}/{}{}", &path[..open], inner, rest))
}

fn unquote(s: &str) -> Option<&str> {
    for quote in ['\'', '"'] {
        if let Some(stripped) = s.strip_prefix(quote) {
            return stripped.strip_suffix(quote);
        }
    }
    Some(s)
}

fn is_valid_segment(s: &str) -> bool {
    !s.is_empty()
        && !s
            .chars()
            .any(|c| matches!(c, '(' | ')' | '\'' | '"' | '?') || c.is_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_collection() {
        let r = parse("/student");
        assert_eq!(r.collection, "student");
        assert_eq!(r.id, None);
        assert_eq!(r.raw_path, "/student");
        assert!(r.is_collection());
    }

    #[test]
    fn all_row_notations_are_equivalent() {
        let expected = parse("/student/1");
        assert_eq!(expected.id.as_deref(), Some("1"));
        assert_eq!(expected.raw_path, "/student/1");

        for path in ["/student(1)", "/student('1')", "/student(\"1\")", "student/1"] {
            assert_eq!(parse(path), expected, "notation {}", path);
        }
    }

    #[test]
    fn parse_query() {
        let r = parse("/student('4')?filter=age,gt,18");
        assert_eq!(r.collection, "student");
        assert_eq!(r.id.as_deref(), Some("4"));
        assert_eq!(r.raw_path, "/student/4");
        assert_eq!(r.query, "filter=age,gt,18");
    }

    #[test]
    fn parse_field_segment() {
        let r = parse("/student/4/name");
        assert_eq!(r.field.as_deref(), Some("name"));
        assert_eq!(r.raw_path, "/student/4");

        let r = parse("/student('4')/name");
        assert_eq!(r.field.as_deref(), Some("name"));
        assert_eq!(r.to_string(), "/student/4/name");
    }

    #[test]
    fn empty_and_root_paths() {
        for path in ["", "/", "//", "?x=1", "   "] {
            let r = parse(path);
            assert!(r.is_empty(), "path {:?}", path);
            assert_eq!(r.id, None);
        }
    }

    #[test]
    fn malformed_paths_degrade_to_empty() {
        for path in ["/student(1", "/student)1(", "/stu'dent/1", "/student('1'", "/a(1)b"] {
            assert!(parse(path).is_empty(), "path {:?}", path);
        }
    }

    #[test]
    fn require_helpers() {
        assert!(parse("/student").require_id().is_err());
        assert!(matches!(
            parse("").require_collection(),
            Err(Error::InvalidPath(_))
        ));
        assert_eq!(parse("/student/9").require_id().unwrap(), "9");
    }

    #[test]
    fn constructors_match_parse() {
        assert_eq!(EntityRef::row("orders", "12"), parse("/orders/12"));
        assert_eq!(EntityRef::collection("orders"), parse("/orders"));
        assert!(EntityRef::collection("bad name").is_empty());
    }
}

//! Tag query grammar.
//!
//! A query is zero or more clauses of the form `Field = 'value'` joined by
//! ` && `. An empty clause set means "no filter": the store returns every
//! object in the container. Values are sanitized with [`sanitize`] both when
//! tags are written and when a query is built; if the two ever disagree,
//! lookups silently miss.

use crate::error::{Error, ErrorKind};
use crate::models::ObjectTags;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

const CLAUSE_SEPARATOR: &str = " && ";

/// Make a value safe to embed in a quoted tag-query clause.
///
/// Single quotes are dropped and path separators are replaced with sentinel
/// tokens (`/` → `-_-`, `\` → `_-_`).
///
/// ```
/// use kept_storage::search::sanitize;
/// assert_eq!(sanitize("/a\\b'c"), "-_-a_-_bc");
/// ```
pub fn sanitize(value: &str) -> String {
    value.replace('\'', "").replace('/', "-_-").replace('\\', "_-_")
}

/// Tag fields that can appear in a query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TagField {
    FileExtension,
    RelativePath,
    FileName,
}
impl TagField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagField::FileExtension => "FileExtension",
            TagField::RelativePath => "RelativePath",
            TagField::FileName => "FileName",
        }
    }
}
impl Display for TagField {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}
impl FromStr for TagField {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FileExtension" => Ok(TagField::FileExtension),
            "RelativePath" => Ok(TagField::RelativePath),
            "FileName" => Ok(TagField::FileName),
            _ => exn::bail!(ErrorKind::InvalidQuery(format!("unknown tag field `{s}`"))),
        }
    }
}

/// A non-empty conjunction of sanitized equality clauses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagQuery {
    clauses: Vec<(TagField, String)>,
}
impl TagQuery {
    pub fn clauses(&self) -> &[(TagField, String)] {
        &self.clauses
    }

    /// Evaluate the query against an object's stored tags.
    pub fn matches(&self, tags: &ObjectTags) -> bool {
        self.clauses.iter().all(|(field, value)| tags.get(*field) == value)
    }
}
impl Display for TagQuery {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (i, (field, value)) in self.clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(CLAUSE_SEPARATOR)?;
            }
            write!(f, "{field} = '{value}'")?;
        }
        Ok(())
    }
}
impl FromStr for TagQuery {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut clauses = Vec::new();
        for clause in s.split(CLAUSE_SEPARATOR) {
            let (field, value) = clause
                .split_once('=')
                .ok_or_else(|| exn::Exn::from(ErrorKind::InvalidQuery(clause.to_string())))?;
            let value = value
                .trim()
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .filter(|v| !v.contains('\''))
                .ok_or_else(|| exn::Exn::from(ErrorKind::InvalidQuery(clause.to_string())))?;
            clauses.push((field.trim().parse()?, value.to_string()));
        }
        Ok(Self { clauses })
    }
}

/// Optional filter fields used to locate objects.
///
/// ```
/// use kept_storage::search::ObjectSearch;
///
/// let search = ObjectSearch::new().relative_path("/sql/db.bak").file_name("db.bak");
/// let query = search.to_query().unwrap();
/// assert_eq!(query.to_string(), "RelativePath = '-_-sql-_-db.bak' && FileName = 'db.bak'");
/// assert!(ObjectSearch::new().to_query().is_none());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectSearch {
    pub file_extension: Option<String>,
    pub relative_path: Option<String>,
    pub file_name: Option<String>,
}
impl ObjectSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_extension(mut self, value: impl Into<String>) -> Self {
        self.file_extension = Some(value.into());
        self
    }

    pub fn relative_path(mut self, value: impl Into<String>) -> Self {
        self.relative_path = Some(value.into());
        self
    }

    pub fn file_name(mut self, value: impl Into<String>) -> Self {
        self.file_name = Some(value.into());
        self
    }

    /// Build the query, or `None` when no field is set.
    pub fn to_query(&self) -> Option<TagQuery> {
        let clauses: Vec<_> = [
            (TagField::FileExtension, &self.file_extension),
            (TagField::RelativePath, &self.relative_path),
            (TagField::FileName, &self.file_name),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.as_deref().map(|v| (field, sanitize(v))))
        .collect();
        match clauses.is_empty() {
            true => None,
            false => Some(TagQuery { clauses }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("plain.bak", "plain.bak")]
    #[case("/a/b", "-_-a-_-b")]
    #[case("\\a\\b", "_-_a_-_b")]
    #[case("o'brien's", "obriens")]
    #[case("", "")]
    fn test_sanitize(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize(input), expected);
    }

    #[test]
    fn test_empty_search_is_no_filter() {
        assert_eq!(ObjectSearch::new().to_query(), None);
    }

    #[test]
    fn test_clause_order_is_fixed() {
        let query = ObjectSearch::new().file_name("x.bak").file_extension(".bak").to_query().unwrap();
        assert_eq!(query.to_string(), "FileExtension = '.bak' && FileName = 'x.bak'");
    }

    #[test]
    fn test_single_clause() {
        let query = ObjectSearch::new().file_extension(".trn").to_query().unwrap();
        assert_eq!(query.to_string(), "FileExtension = '.trn'");
        assert_eq!(query.clauses().len(), 1);
    }

    #[test]
    fn test_awkward_path_matches_stored_tags() {
        let path = "/o'neil\\reports/q1.bak";
        let tags = ObjectTags::new("c", ".bak", path, "q1.bak", "q1.bak");
        let query = ObjectSearch::new().relative_path(path).file_name("q1.bak").to_query().unwrap();
        assert!(query.matches(&tags));
        // Re-parsing the rendered query (as a string-based store would) still matches.
        let reparsed: TagQuery = query.to_string().parse().unwrap();
        assert_eq!(reparsed, query);
        assert!(reparsed.matches(&tags));
    }

    #[test]
    fn test_mismatch() {
        let tags = ObjectTags::new("c", ".bak", "/a.bak", "a.bak", "a");
        let query = ObjectSearch::new().relative_path("/b.bak").to_query().unwrap();
        assert!(!query.matches(&tags));
    }

    #[rstest]
    #[case("FileName")]
    #[case("FileName = x")]
    #[case("Owner = 'x'")]
    #[case("FileName = 'x' && ")]
    #[case("FileName = 'it's'")]
    fn test_parse_invalid(#[case] input: &str) {
        let err = input.parse::<TagQuery>().unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidQuery(_)));
    }
}

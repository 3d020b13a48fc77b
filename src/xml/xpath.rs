//! Namespace-aware path queries with mandatory/optional extraction semantics.
//!
//! A query is a `/`-separated sequence of child steps, each
//! `prefix:localName` (or a bare local name for the null namespace). Prefixes
//! resolve against an explicit prefix→URI table, so queries stay readable
//! while matching namespace-correctly regardless of the prefixes the source
//! document happens to use. The first match in document order wins.
//!
//! The [`FieldReader`] adds the extraction discipline the mappers need:
//! mandatory fields fail with a [`MappingError`] carrying the element path;
//! optional-but-unparsable values fall back to a default and emit a WARNING
//! finding into the reader's sink.

use chrono::NaiveDate;
use roxmltree::Node;
use rust_decimal::Decimal;

use crate::error::MappingError;
use crate::report::{Finding, codes};

/// Prefix → namespace URI table.
pub type NsTable<'a> = &'a [(&'a str, &'a str)];

fn step_matches(node: Node<'_, '_>, step: &str, ns: NsTable<'_>) -> bool {
    if !node.is_element() {
        return false;
    }
    let (want_ns, local) = match step.split_once(':') {
        Some((prefix, local)) => {
            let uri = ns.iter().find(|(p, _)| *p == prefix).map(|(_, u)| *u);
            (uri, local)
        }
        None => (None, step),
    };
    node.tag_name().name() == local && node.tag_name().namespace() == want_ns
}

fn descend<'a, 'input>(
    from: Node<'a, 'input>,
    steps: &[&str],
    ns: NsTable<'_>,
    out: &mut Vec<Node<'a, 'input>>,
    first_only: bool,
) {
    let Some((step, rest)) = steps.split_first() else {
        return;
    };
    for child in from.children() {
        if first_only && !out.is_empty() {
            return;
        }
        if !step_matches(child, step, ns) {
            continue;
        }
        if rest.is_empty() {
            out.push(child);
        } else {
            descend(child, rest, ns, out, first_only);
        }
    }
}

/// First node matching `query` below `from`, in document order.
pub fn find_first<'a, 'input>(
    from: Node<'a, 'input>,
    query: &str,
    ns: NsTable<'_>,
) -> Option<Node<'a, 'input>> {
    let steps: Vec<&str> = query.split('/').collect();
    let mut out = Vec::with_capacity(1);
    descend(from, &steps, ns, &mut out, true);
    out.into_iter().next()
}

/// All nodes matching `query` below `from`, in document order.
pub fn find_all<'a, 'input>(
    from: Node<'a, 'input>,
    query: &str,
    ns: NsTable<'_>,
) -> Vec<Node<'a, 'input>> {
    let steps: Vec<&str> = query.split('/').collect();
    let mut out = Vec::new();
    descend(from, &steps, ns, &mut out, false);
    out
}

/// Mandatory container lookup; the error carries the full element path.
pub fn require_node<'a, 'input>(
    from: Node<'a, 'input>,
    query: &str,
    ns: NsTable<'_>,
) -> Result<Node<'a, 'input>, MappingError> {
    find_first(from, query, ns).ok_or_else(|| MappingError::missing(field_path(from, query)))
}

/// Element path of `node` from below the document root, slash-separated and
/// prefix-free, e.g. `ExchangedDocument/IssueDateTime`.
pub fn node_path(node: Node<'_, '_>) -> String {
    let mut names: Vec<&str> = node
        .ancestors()
        .filter(|n| n.is_element())
        .map(|n| n.tag_name().name())
        .collect();
    names.reverse();
    // Drop the document root element itself.
    names.drain(..1.min(names.len()));
    names.join("/")
}

/// Full field path for error reporting: context node path plus the query with
/// prefixes stripped.
pub fn field_path(from: Node<'_, '_>, query: &str) -> String {
    let stripped: Vec<&str> = query
        .split('/')
        .map(|s| s.split_once(':').map_or(s, |(_, local)| local))
        .collect();
    let base = node_path(from);
    if base.is_empty() {
        stripped.join("/")
    } else {
        format!("{base}/{}", stripped.join("/"))
    }
}

/// Parse the two date shapes CII and UBL use: `YYYYMMDD` (CII format 102)
/// and `YYYY-MM-DD`. Everything else is rejected.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.len() == 8 && text.bytes().all(|b| b.is_ascii_digit()) {
        NaiveDate::parse_from_str(text, "%Y%m%d").ok()
    } else {
        NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
    }
}

/// Scalar extraction with mandatory/optional semantics and a warning sink.
pub struct FieldReader<'n> {
    ns: NsTable<'n>,
    warnings: Vec<Finding>,
}

impl<'n> FieldReader<'n> {
    pub fn new(ns: NsTable<'n>) -> Self {
        Self {
            ns,
            warnings: Vec::new(),
        }
    }

    /// Drain the WARNING findings accumulated during optional-field recovery.
    pub fn into_warnings(self) -> Vec<Finding> {
        self.warnings
    }

    fn raw_text(&self, from: Node<'_, '_>, query: &str) -> Option<String> {
        find_first(from, query, self.ns)
            .and_then(|n| n.text())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// Optional text; absent or empty yields `None`.
    pub fn text(&mut self, from: Node<'_, '_>, query: &str) -> Option<String> {
        self.raw_text(from, query)
    }

    /// Mandatory text.
    pub fn require_text(
        &mut self,
        from: Node<'_, '_>,
        query: &str,
    ) -> Result<String, MappingError> {
        self.raw_text(from, query)
            .ok_or_else(|| MappingError::missing(field_path(from, query)))
    }

    /// Optional decimal; an unparsable value yields `None` plus a WARNING.
    pub fn decimal(&mut self, from: Node<'_, '_>, query: &str) -> Option<Decimal> {
        let text = self.raw_text(from, query)?;
        match text.parse::<Decimal>() {
            Ok(d) => Some(d),
            Err(_) => {
                self.warn_unparsable(from, query, &text, "decimal");
                None
            }
        }
    }

    /// Optional decimal with a default for both absence and unparsable text.
    pub fn decimal_or(&mut self, from: Node<'_, '_>, query: &str, default: Decimal) -> Decimal {
        match self.raw_text(from, query) {
            None => default,
            Some(text) => text.parse::<Decimal>().unwrap_or_else(|_| {
                self.warn_unparsable(from, query, &text, "decimal");
                default
            }),
        }
    }

    /// Mandatory decimal; strict — a non-numeric value fails.
    pub fn require_decimal(
        &mut self,
        from: Node<'_, '_>,
        query: &str,
    ) -> Result<Decimal, MappingError> {
        let path = field_path(from, query);
        let text = self
            .raw_text(from, query)
            .ok_or_else(|| MappingError::missing(path.clone()))?;
        text.parse::<Decimal>()
            .map_err(|_| MappingError::invalid(path, format!("'{text}' is not a decimal")))
    }

    /// Optional date; an unparsable value yields `None` plus a WARNING.
    pub fn date(&mut self, from: Node<'_, '_>, query: &str) -> Option<NaiveDate> {
        let text = self.raw_text(from, query)?;
        match parse_date(&text) {
            Some(d) => Some(d),
            None => {
                self.warn_unparsable(from, query, &text, "date");
                None
            }
        }
    }

    /// Mandatory date.
    pub fn require_date(
        &mut self,
        from: Node<'_, '_>,
        query: &str,
    ) -> Result<NaiveDate, MappingError> {
        let path = field_path(from, query);
        let text = self
            .raw_text(from, query)
            .ok_or_else(|| MappingError::missing(path.clone()))?;
        parse_date(&text)
            .ok_or_else(|| MappingError::invalid(path, format!("'{text}' is not a valid date")))
    }

    fn warn_unparsable(&mut self, from: Node<'_, '_>, query: &str, text: &str, kind: &str) {
        let path = field_path(from, query);
        self.warnings.push(
            Finding::warning(
                codes::MAP_INVALID_VALUE,
                format!("optional field is not a valid {kind}; using default"),
            )
            .with_location(path.clone())
            .with_value(path, text),
        );
    }
}

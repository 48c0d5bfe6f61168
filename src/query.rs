//! The query scope: filters, ancestors, projection, ordering, pagination.
//!
//! Scopes are immutable by convention: every mutator clones the current
//! scope and returns the modified copy, so a base query can branch into
//! derived queries safely, concurrent readers included. Construction
//! errors accumulate on the scope and surface together when a statement is
//! rendered, so a full builder chain can be expressed before any error is
//! seen.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::key::Key;
use crate::model::KEY_TAG;
use crate::value::Value;

/// Comparison operators accepted by filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// Equal (`=`); against a nil value renders `IS NULL`.
    Eq,
    /// Not equal (`!=`, `<>`); against a nil value renders `IS NOT NULL`.
    Ne,
    /// Greater than (`>`)
    Gt,
    /// Greater than or equal (`>=`)
    Ge,
    /// Less than (`<`)
    Lt,
    /// Less than or equal (`<=`)
    Le,
    /// Pattern match (`LIKE`)
    Like,
    /// Negated pattern match (`NOT LIKE`)
    NotLike,
    /// Set membership (`IN`)
    In,
    /// Negated set membership (`NOT IN`)
    NotIn,
}

impl Operator {
    /// The textual SQL operator.
    pub fn sql_symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
        }
    }

    /// Parse a symbolic alias (`>=`), word form (`in`), or `$`-prefixed
    /// JSON form (`$gte`). All normalize to the same operator.
    pub fn parse(token: &str) -> Result<Operator> {
        let token = token.trim();
        let normalized = token
            .strip_prefix('$')
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| token.to_ascii_lowercase());
        Ok(match normalized.as_str() {
            "=" | "==" | "eq" => Operator::Eq,
            "!=" | "<>" | "ne" => Operator::Ne,
            ">" | "gt" => Operator::Gt,
            ">=" | "gte" | "ge" => Operator::Ge,
            "<" | "lt" => Operator::Lt,
            "<=" | "lte" | "le" => Operator::Le,
            "like" => Operator::Like,
            "nlike" | "notlike" => Operator::NotLike,
            "in" => Operator::In,
            "nin" | "notin" => Operator::NotIn,
            _ => return Err(Error::InvalidOperator(token.to_string())),
        })
    }
}

impl std::str::FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Operator::parse(s)
    }
}

/// One field/operator/value predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: Operator,
    pub value: Value,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// One ordering term.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

/// Row lock mode for SELECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    #[default]
    None,
    ForUpdate,
    ForShare,
}

/// An immutable-by-convention query specification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub table: String,
    pub filters: Vec<Filter>,
    pub ancestors: Vec<Key>,
    pub projection: Vec<String>,
    pub omits: Vec<String>,
    pub orders: Vec<Order>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub lock: LockMode,
    /// Include soft-deleted rows.
    pub unscoped: bool,
    /// Accumulated construction errors, reported at render time.
    pub errors: Vec<Error>,
}

impl Query {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    /// Add a predicate. The operator token accepts every alias
    /// [`Operator::parse`] accepts; an invalid token is recorded and
    /// surfaces when the query is rendered.
    pub fn filter(&self, column: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        let mut next = self.clone();
        match Operator::parse(op) {
            Ok(op) => next.filters.push(Filter {
                column: column.into(),
                op,
                value: value.into(),
            }),
            Err(e) => next.errors.push(e),
        }
        next
    }

    /// Add a predicate with an already-resolved operator.
    pub fn filter_op(
        &self,
        column: impl Into<String>,
        op: Operator,
        value: impl Into<Value>,
    ) -> Self {
        let mut next = self.clone();
        next.filters.push(Filter {
            column: column.into(),
            op,
            value: value.into(),
        });
        next
    }

    /// Add predicates from a JSON query object:
    /// `{"Age": {"$gte": 21}, "Name": "jo"}`. A bare value is an implicit
    /// `$eq`.
    pub fn filter_json(&self, json: &serde_json::Value) -> Self {
        let mut next = self.clone();
        let Some(obj) = json.as_object() else {
            next.errors
                .push(Error::InvalidQuery("filter object must be a map".to_string()));
            return next;
        };
        for (column, spec) in obj {
            match spec {
                serde_json::Value::Object(ops) => {
                    for (op_token, value) in ops {
                        match Operator::parse(op_token) {
                            Ok(op) => next.filters.push(Filter {
                                column: column.clone(),
                                op,
                                value: Value::from_json(value),
                            }),
                            Err(e) => next.errors.push(e),
                        }
                    }
                }
                value => next.filters.push(Filter {
                    column: column.clone(),
                    op: Operator::Eq,
                    value: Value::from_json(value),
                }),
            }
        }
        next
    }

    /// Filter on the identity pseudo-column. Renders against the
    /// `$Parent`/`$Key` pair (equality) or the concatenated key form
    /// (ranges). Incomplete keys are recorded as errors.
    pub fn where_key(&self, op: Operator, key: Key) -> Self {
        let mut next = self.clone();
        if !key.is_complete() {
            next.errors.push(Error::IncompleteKey(key.encode()));
        }
        next.filters.push(Filter {
            column: KEY_TAG.to_string(),
            op,
            value: Value::Key(key),
        });
        next
    }

    /// Constrain results to the given ancestor's sub-tree (the ancestor
    /// itself included). Incomplete keys are recorded as errors.
    pub fn ancestor(&self, key: Key) -> Self {
        let mut next = self.clone();
        if key.is_complete() {
            next.ancestors.push(key);
        } else {
            next.errors.push(Error::IncompleteKey(key.encode()));
        }
        next
    }

    /// Project only the named columns.
    pub fn select(&self, columns: &[&str]) -> Self {
        let mut next = self.clone();
        for c in columns {
            if c.is_empty() {
                next.errors
                    .push(Error::InvalidQuery("empty projection entry".to_string()));
            } else {
                next.projection.push(c.to_string());
            }
        }
        next
    }

    /// Exclude the named columns from the projection.
    pub fn omit(&self, columns: &[&str]) -> Self {
        let mut next = self.clone();
        for c in columns {
            if c.is_empty() {
                next.errors
                    .push(Error::InvalidQuery("empty omit entry".to_string()));
            } else {
                next.omits.push(c.to_string());
            }
        }
        next
    }

    /// Append an ordering term.
    pub fn order_by(&self, column: impl Into<String>, direction: Direction) -> Self {
        let mut next = self.clone();
        next.orders.push(Order {
            column: column.into(),
            direction,
        });
        next
    }

    pub fn limit(&self, n: u64) -> Self {
        let mut next = self.clone();
        next.limit = Some(n);
        next
    }

    pub fn offset(&self, n: u64) -> Self {
        let mut next = self.clone();
        next.offset = Some(n);
        next
    }

    pub fn lock(&self, mode: LockMode) -> Self {
        let mut next = self.clone();
        next.lock = mode;
        next
    }

    /// Include soft-deleted rows in results.
    pub fn unscoped(&self) -> Self {
        let mut next = self.clone();
        next.unscoped = true;
        next
    }

    /// Surface accumulated construction errors, joined, or nothing.
    pub fn check(&self) -> Result<()> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let joined = self
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Err(Error::InvalidQuery(joined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_operator_aliases_normalize() {
        for (token, op) in [
            ("=", Operator::Eq),
            ("$eq", Operator::Eq),
            ("!=", Operator::Ne),
            ("<>", Operator::Ne),
            ("$ne", Operator::Ne),
            (">=", Operator::Ge),
            ("$gte", Operator::Ge),
            ("<", Operator::Lt),
            ("like", Operator::Like),
            ("$nlike", Operator::NotLike),
            ("in", Operator::In),
            ("nin", Operator::NotIn),
            ("$nin", Operator::NotIn),
        ] {
            assert_eq!(Operator::parse(token).unwrap(), op, "token {token:?}");
        }
        assert!(Operator::parse("~~").is_err());
    }

    #[test]
    fn test_builders_clone_not_mutate() {
        let base = Query::new("User").filter("Age", ">=", 21i64);
        let adults = base.order_by("Name", Direction::Asc);
        let named = base.filter("Name", "=", "jo");
        assert_eq!(base.filters.len(), 1);
        assert_eq!(base.orders.len(), 0);
        assert_eq!(adults.orders.len(), 1);
        assert_eq!(named.filters.len(), 2);
    }

    #[test]
    fn test_errors_accumulate_until_checked() {
        let q = Query::new("User")
            .filter("A", "bogus", 1i64)
            .select(&[""])
            .filter("B", "??", 2i64);
        assert_eq!(q.errors.len(), 3);
        let err = q.check().unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_incomplete_ancestor_recorded() {
        let q = Query::new("User").ancestor(Key::incomplete("Account"));
        assert!(q.ancestors.is_empty());
        assert!(q.check().is_err());
    }

    #[test]
    fn test_where_key_requires_complete_key() {
        let q = Query::new("User").where_key(Operator::Eq, Key::with_int("User", 1));
        assert!(q.check().is_ok());
        assert_eq!(q.filters[0].column, KEY_TAG);

        let q = Query::new("User").where_key(Operator::Eq, Key::incomplete("User"));
        assert!(q.check().is_err());
    }

    #[test]
    fn test_json_filter_object() {
        let q = Query::new("User").filter_json(&serde_json::json!({
            "Age": {"$gte": 21},
            "Name": "jo",
        }));
        assert!(q.check().is_ok());
        assert_eq!(q.filters.len(), 2);
        assert!(q.filters.contains(&Filter {
            column: "Age".to_string(),
            op: Operator::Ge,
            value: Value::Int(21),
        }));
        assert!(q.filters.contains(&Filter {
            column: "Name".to_string(),
            op: Operator::Eq,
            value: Value::Text("jo".to_string()),
        }));
    }
}

//! Filter predicates and their compilation to the backend query grammar.
//!
//! ```text
//! filter=<path>,<op>,<value>[,<value2>]                      one predicate
//! filter[]=<p1>&filter[]=<p2>...&satisfy=<all|any>          several
//! ```
//!
//! Grouping is one level deep: a [`Filter::Group`] holds plain predicates
//! only, and all groups in one compilation must agree on the combinator.

use crate::{error::Result, Error, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "EQ")]
    Eq,
    #[serde(rename = "NE")]
    Ne,
    #[serde(rename = "GT")]
    Gt,
    #[serde(rename = "GE")]
    Ge,
    #[serde(rename = "LT")]
    Lt,
    #[serde(rename = "LE")]
    Le,
    /// Between, inclusive; takes two values
    #[serde(rename = "BT")]
    Between,
    Contains,
    StartsWith,
    EndsWith,
}

impl Operator {
    /// Operator code in the backend query grammar.
    pub fn code(self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "neq",
            Operator::Gt => "gt",
            Operator::Ge => "ge",
            Operator::Lt => "lt",
            Operator::Le => "le",
            Operator::Between => "bt",
            Operator::Contains => "cs",
            Operator::StartsWith => "sw",
            Operator::EndsWith => "ew",
        }
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "EQ" => Operator::Eq,
            "NE" => Operator::Ne,
            "GT" => Operator::Gt,
            "GE" => Operator::Ge,
            "LT" => Operator::Lt,
            "LE" => Operator::Le,
            "BT" => Operator::Between,
            "Contains" => Operator::Contains,
            "StartsWith" => Operator::StartsWith,
            "EndsWith" => Operator::EndsWith,
            other => return Err(Error::UnsupportedFilter(format!("operator {}", other))),
        })
    }
}

/// How the predicates of a query combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    /// AND
    #[default]
    All,
    /// OR
    Any,
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Combinator::All => write!(f, "all"),
            Combinator::Any => write!(f, "any"),
        }
    }
}

/// A single filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    pub path: String,
    pub operator: Operator,
    pub value1: Value,
    pub value2: Option<Value>,
}

impl Predicate {
    pub fn new(path: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            operator,
            value1: value.into(),
            value2: None,
        }
    }

    pub fn equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(path, Operator::Eq, value)
    }

    pub fn between(path: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            operator: Operator::Between,
            value1: low.into(),
            value2: Some(high.into()),
        }
    }

    fn compile(&self) -> Result<String> {
        let mut out = format!(
            "{},{},{}",
            self.path,
            self.operator.code(),
            urlencoding::encode(&self.value1.to_string())
        );
        if self.operator == Operator::Between {
            let high = self.value2.as_ref().ok_or_else(|| {
                Error::UnsupportedFilter(format!("between on {} needs two values", self.path))
            })?;
            out.push(',');
            out.push_str(&urlencoding::encode(&high.to_string()));
        }
        Ok(out)
    }
}

/// A predicate or a one-level group of predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Filter {
    Predicate(Predicate),
    Group {
        combinator: Combinator,
        predicates: Vec<Predicate>,
    },
}

impl Filter {
    pub fn all(predicates: Vec<Predicate>) -> Self {
        Filter::Group {
            combinator: Combinator::All,
            predicates,
        }
    }

    pub fn any(predicates: Vec<Predicate>) -> Self {
        Filter::Group {
            combinator: Combinator::Any,
            predicates,
        }
    }
}

impl From<Predicate> for Filter {
    fn from(p: Predicate) -> Self {
        Filter::Predicate(p)
    }
}

/// Compile filters into a query fragment (without a leading `?`).
///
/// Returns an empty string when there is nothing to filter on.
pub fn compile(filters: &[Filter]) -> Result<String> {
    let mut parts = Vec::new();
    let mut combinator: Option<Combinator> = None;

    for filter in filters {
        match filter {
            Filter::Predicate(p) => parts.push(p.compile()?),
            Filter::Group {
                combinator: c,
                predicates,
            } => {
                if predicates.is_empty() {
                    continue;
                }
                match combinator {
                    Some(existing) if existing != *c => {
                        return Err(Error::UnsupportedFilter(
                            "groups with different combinators cannot be mixed".into(),
                        ))
                    }
                    _ => combinator = Some(*c),
                }
                for p in predicates {
                    parts.push(p.compile()?);
                }
            }
        }
    }

    Ok(match parts.len() {
        0 => String::new(),
        1 => format!("filter={}", parts[0]),
        _ => {
            let joined = parts
                .iter()
                .map(|p| format!("filter[]={}", p))
                .collect::<Vec<_>>()
                .join("&");
            format!("{}&satisfy={}", joined, combinator.unwrap_or_default())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_predicate() {
        let q = compile(&[Predicate::new("age", Operator::Gt, 18).into()]).unwrap();
        assert_eq!(q, "filter=age,gt,18");
    }

    #[test]
    fn ungrouped_predicates_default_to_all() {
        let q = compile(&[
            Predicate::equals("name", "Ann").into(),
            Predicate::new("age", Operator::Le, 30).into(),
        ])
        .unwrap();
        assert_eq!(q, "filter[]=name,eq,Ann&filter[]=age,le,30&satisfy=all");
    }

    #[test]
    fn group_sets_combinator() {
        let q = compile(&[Filter::any(vec![
            Predicate::new("name", Operator::StartsWith, "A"),
            Predicate::new("name", Operator::EndsWith, "z"),
        ])])
        .unwrap();
        assert_eq!(q, "filter[]=name,sw,A&filter[]=name,ew,z&satisfy=any");
    }

    #[test]
    fn between_takes_two_values() {
        let q = compile(&[Predicate::between("age", 10, 20).into()]).unwrap();
        assert_eq!(q, "filter=age,bt,10,20");

        let broken = Predicate::new("age", Operator::Between, 10);
        assert!(compile(&[broken.into()]).is_err());
    }

    #[test]
    fn values_are_percent_encoded() {
        let q = compile(&[Predicate::new("name", Operator::Contains, "a b&c").into()]).unwrap();
        assert_eq!(q, "filter=name,cs,a%20b%26c");
    }

    #[test]
    fn mixed_combinators_rejected() {
        let result = compile(&[
            Filter::all(vec![Predicate::equals("a", 1)]),
            Filter::any(vec![Predicate::equals("b", 2)]),
        ]);
        assert!(matches!(result, Err(Error::UnsupportedFilter(_))));
    }

    #[test]
    fn empty_input() {
        assert_eq!(compile(&[]).unwrap(), "");
        assert_eq!(compile(&[Filter::all(vec![])]).unwrap(), "");
    }

    #[test]
    fn operator_codes() {
        assert_eq!("NE".parse::<Operator>().unwrap().code(), "neq");
        assert_eq!("Contains".parse::<Operator>().unwrap(), Operator::Contains);
        assert!("LIKE".parse::<Operator>().is_err());
    }
}

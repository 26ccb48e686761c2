//! Filter selection → parameterized predicate.
//!
//! A [`Predicate`] is a template (a conjunction of `IN` tests over canonical
//! columns, with positional `$n` placeholders) plus the ordered list of bound
//! token values. Token text never appears in the template; it is only looked
//! at when the predicate is bound against the dataset view.

use crate::error::QueryError;
use crate::filters::{Dimension, FilterSelection};
use crate::types::Record;
use std::collections::HashSet;
use std::fmt;

/// One inclusion test: `column IN ($k, .. $k+arity-1)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub dimension: Dimension,
    pub arity: usize,
}

impl Clause {
    /// Column expression the test runs against. Year tokens are strings, the
    /// canonical column is an integer, so the column is cast, not the tokens.
    pub fn column_expr(&self) -> &'static str {
        match self.dimension {
            Dimension::City => "city",
            Dimension::Year => "CAST(year AS VARCHAR)",
            Dimension::Month => "month",
            Dimension::Format => "format",
            Dimension::Vendor => "vendor",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    clauses: Vec<Clause>,
    params: Vec<String>,
}

impl Predicate {
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn is_tautology(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Resolve placeholders against the parameter list.
    pub fn bind(&self) -> Result<BoundPredicate<'_>, QueryError> {
        let mut tests = Vec::with_capacity(self.clauses.len());
        let mut offset = 0;
        for clause in &self.clauses {
            let end = offset + clause.arity;
            if clause.arity == 0 || end > self.params.len() {
                return Err(QueryError::Execution {
                    shape: "predicate",
                    reason: format!(
                        "clause on {} expects {} parameters at position {}, {} bound",
                        clause.dimension,
                        clause.arity,
                        offset + 1,
                        self.params.len()
                    ),
                });
            }
            let set: HashSet<&str> = self.params[offset..end].iter().map(String::as_str).collect();
            tests.push((clause.dimension, set));
            offset = end;
        }
        if offset != self.params.len() {
            return Err(QueryError::Execution {
                shape: "predicate",
                reason: format!("{} parameters bound, {} used", self.params.len(), offset),
            });
        }
        Ok(BoundPredicate { tests })
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return f.write_str("1=1");
        }
        let mut next = 1;
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            write!(f, "{} IN (", clause.column_expr())?;
            for j in 0..clause.arity {
                if j > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "${}", next)?;
                next += 1;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

/// A predicate with its parameters resolved into per-column token sets.
#[derive(Debug)]
pub struct BoundPredicate<'a> {
    tests: Vec<(Dimension, HashSet<&'a str>)>,
}

impl BoundPredicate<'_> {
    pub fn matches(&self, row: &Record) -> bool {
        self.tests.iter().all(|(dimension, tokens)| match dimension {
            Dimension::City => tokens.contains(row.city.as_str()),
            Dimension::Year => tokens.contains(row.year.to_string().as_str()),
            Dimension::Month => tokens.contains(row.month.as_str()),
            Dimension::Format => tokens.contains(row.format.as_str()),
            Dimension::Vendor => tokens.contains(row.vendor.as_str()),
        })
    }
}

/// Compile `selection` into a predicate, leaving out `exclude` if given.
///
/// The whole selection is validated first, including the excluded
/// dimension, so a malformed token fails every variant alike.
pub fn compile(
    selection: &FilterSelection,
    exclude: Option<Dimension>,
) -> Result<Predicate, QueryError> {
    selection.validate()?;
    let mut predicate = Predicate::default();
    for dimension in Dimension::ALL {
        if Some(dimension) == exclude {
            continue;
        }
        let tokens = selection.get(dimension);
        if tokens.is_empty() {
            continue;
        }
        predicate.clauses.push(Clause {
            dimension,
            arity: tokens.len(),
        });
        predicate.params.extend(tokens.iter().cloned());
    }
    Ok(predicate)
}

/// The main predicate plus the five exclude-self variants, all compiled from
/// one selection snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateSet {
    pub main: Predicate,
    exclude_self: [Predicate; 5],
}

impl PredicateSet {
    pub fn compile(selection: &FilterSelection) -> Result<Self, QueryError> {
        let main = compile(selection, None)?;
        let exclude_self = [
            compile(selection, Some(Dimension::City))?,
            compile(selection, Some(Dimension::Year))?,
            compile(selection, Some(Dimension::Month))?,
            compile(selection, Some(Dimension::Format))?,
            compile(selection, Some(Dimension::Vendor))?,
        ];
        Ok(Self { main, exclude_self })
    }

    /// Predicate used to list the available values of `dimension`.
    pub fn excluding(&self, dimension: Dimension) -> &Predicate {
        let idx = Dimension::ALL
            .iter()
            .position(|d| *d == dimension)
            .unwrap_or_default();
        &self.exclude_self[idx]
    }
}

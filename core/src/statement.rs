//! Statement Classification
//!
//! A statement is SQL text tagged with the operation it is meant for. The tag is
//! checked once, at construction, with a cheap keyword prefix test:
//!
//! - [`Query`]: trimmed text starts with `select`
//! - [`Mutation`]: trimmed text starts with `insert`, `update` or `delete`
//!
//! The check is case-insensitive. It does not parse SQL and is not a security
//! boundary; it only stops a SELECT from reaching the write path and vice versa.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Classification errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StatementError {
    #[error("it is not query statement")]
    NotAQuery,

    #[error("it is not mutation statement")]
    NotAMutation,
}

const QUERY_KEYWORDS: &[&str] = &["select"];
const MUTATION_KEYWORDS: &[&str] = &["insert", "update", "delete"];

fn starts_with_keyword(text: &str, keywords: &[&str]) -> bool {
    let text = text.trim_start();
    keywords.iter().any(|keyword| {
        text.get(..keyword.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(keyword))
    })
}

/// Checks that `text` is a query (SELECT) statement.
pub fn validate_query(text: &str) -> Result<(), StatementError> {
    if starts_with_keyword(text, QUERY_KEYWORDS) {
        Ok(())
    } else {
        Err(StatementError::NotAQuery)
    }
}

/// Checks that `text` is a mutation (INSERT | UPDATE | DELETE) statement.
pub fn validate_mutation(text: &str) -> Result<(), StatementError> {
    if starts_with_keyword(text, MUTATION_KEYWORDS) {
        Ok(())
    } else {
        Err(StatementError::NotAMutation)
    }
}

// ============== Statement Kinds ==============

mod sealed {
    pub trait Sealed {}
}

/// Marker for the operation a [`Statement`] is meant for.
pub trait StatementKind: sealed::Sealed + Send + Sync + 'static {
    /// Human readable kind name, used in logs.
    const NAME: &'static str;

    fn validate(text: &str) -> Result<(), StatementError>;
}

/// Read-only statements, routed to replicas unless asked otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {}

/// Write statements, always routed to the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {}

impl sealed::Sealed for Query {}
impl sealed::Sealed for Mutation {}

impl StatementKind for Query {
    const NAME: &'static str = "query";

    fn validate(text: &str) -> Result<(), StatementError> {
        validate_query(text)
    }
}

impl StatementKind for Mutation {
    const NAME: &'static str = "mutation";

    fn validate(text: &str) -> Result<(), StatementError> {
        validate_mutation(text)
    }
}

// ============== Statement ==============

/// SQL text that passed classification for kind `K`.
///
/// Cloning is cheap; the text is shared.
pub struct Statement<K: StatementKind> {
    text: Arc<str>,
    _kind: PhantomData<K>,
}

/// A validated SELECT statement.
pub type SqlQuery = Statement<Query>;

/// A validated INSERT / UPDATE / DELETE statement.
pub type SqlMutation = Statement<Mutation>;

impl<K: StatementKind> Statement<K> {
    /// Classifies `text` and wraps it if it matches kind `K`.
    pub fn new(text: impl Into<Arc<str>>) -> Result<Self, StatementError> {
        let text = text.into();
        K::validate(&text)?;
        Ok(Self {
            text,
            _kind: PhantomData,
        })
    }

    /// The statement text, exactly as given.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl<K: StatementKind> Clone for Statement<K> {
    fn clone(&self) -> Self {
        Self {
            text: Arc::clone(&self.text),
            _kind: PhantomData,
        }
    }
}

impl<K: StatementKind> fmt::Debug for Statement<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("kind", &K::NAME)
            .field("text", &&*self.text)
            .finish()
    }
}

impl<K: StatementKind> fmt::Display for Statement<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl<K: StatementKind> AsRef<str> for Statement<K> {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

impl<K: StatementKind> PartialEq for Statement<K> {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl<K: StatementKind> Eq for Statement<K> {}

impl<K: StatementKind> TryFrom<&str> for Statement<K> {
    type Error = StatementError;

    fn try_from(text: &str) -> Result<Self, Self::Error> {
        Self::new(text)
    }
}

impl<K: StatementKind> TryFrom<String> for Statement<K> {
    type Error = StatementError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Self::new(text)
    }
}

// ============== IntoStatement ==============

/// Anything a router operation accepts in statement position.
///
/// Already-built statements pass through; plain strings are classified on entry.
pub trait IntoStatement<K: StatementKind> {
    fn into_statement(self) -> Result<Statement<K>, StatementError>;
}

impl<K: StatementKind> IntoStatement<K> for Statement<K> {
    fn into_statement(self) -> Result<Statement<K>, StatementError> {
        Ok(self)
    }
}

impl<K: StatementKind> IntoStatement<K> for &Statement<K> {
    fn into_statement(self) -> Result<Statement<K>, StatementError> {
        Ok(self.clone())
    }
}

impl<K: StatementKind> IntoStatement<K> for &str {
    fn into_statement(self) -> Result<Statement<K>, StatementError> {
        Statement::new(self)
    }
}

impl<K: StatementKind> IntoStatement<K> for String {
    fn into_statement(self) -> Result<Statement<K>, StatementError> {
        Statement::new(self)
    }
}

impl<K: StatementKind> IntoStatement<K> for &String {
    fn into_statement(self) -> Result<Statement<K>, StatementError> {
        Statement::new(self.as_str())
    }
}

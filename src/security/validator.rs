//! SQL query validator.
//!
//! Lexical, pattern-based inspection of the raw query string. This is the first of two
//! independent defenses and is not assumed to be complete: string concatenation,
//! alternate comment syntaxes or Unicode lookalikes can slip past it. The read-only
//! session and transaction in [`crate::database::session`] are the actual boundary.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. percent-decode, then trim (the one and only normalization)
//! 2. statement shape: must start with `SELECT`
//! 3. forbidden tokens: write/DDL/session keywords, comment markers, and `;` when the
//!    separator policy forbids it
//! 4. table allow-list, when configured

use crate::config::{SecurityConfig, SeparatorPolicy};
use crate::error::{SecurityError, SecurityResult};
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

/// Leading SELECT keyword.
static SELECT_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*select\b").expect("Invalid regex: select pattern"));

/// Keywords that write data, change schema or alter session state.
static FORBIDDEN_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(insert|update|delete|alter|drop|create|grant|revoke|truncate|copy|call|refresh|vacuum|analyze|set|reset)\b",
    )
    .expect("Invalid regex: forbidden keyword pattern")
});

/// Inline comment openers (`--` and `/*`).
static COMMENT_MARKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"--|/\*").expect("Invalid regex: comment marker pattern"));

/// Identifier following FROM or JOIN, optionally schema-qualified.
static TABLE_REFERENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:from|join)\s+((?:\w+\.)?\w+)")
        .expect("Invalid regex: table reference pattern")
});

/// Why a query was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    NotASelect,
    ForbiddenToken,
    NoTableReference,
    TableNotAllowed,
}

impl RejectionReason {
    /// Maps a validator error back to its reason; `None` for non-validation errors.
    pub fn of(error: &SecurityError) -> Option<Self> {
        match error {
            SecurityError::NotASelect => Some(Self::NotASelect),
            SecurityError::ForbiddenToken { .. } => Some(Self::ForbiddenToken),
            SecurityError::NoTableReference => Some(Self::NoTableReference),
            SecurityError::TableNotAllowed { .. } => Some(Self::TableNotAllowed),
            SecurityError::Unauthorized | SecurityError::RateLimited => None,
        }
    }
}

/// An accepted query, carrying its normalized text.
///
/// Only produced by [`SqlValidator::validate`]; consumed once by the executor.
#[derive(Debug, PartialEq, Eq)]
pub struct ValidationVerdict {
    normalized_sql: String,
}

impl ValidationVerdict {
    pub fn sql(&self) -> &str {
        &self.normalized_sql
    }

    pub fn into_sql(self) -> String {
        self.normalized_sql
    }
}

/// Single-table allow-list, matched against both the qualified and the bare name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRestriction {
    display: String,
    qualified: String,
    bare: String,
}

impl TableRestriction {
    pub fn new(table: &str) -> Self {
        let qualified = table.trim().to_lowercase();
        let bare = qualified
            .rsplit_once('.')
            .map(|(_, name)| name.to_string())
            .unwrap_or_else(|| qualified.clone());
        Self {
            display: table.trim().to_string(),
            qualified,
            bare,
        }
    }

    pub fn table(&self) -> &str {
        &self.display
    }

    fn allows(&self, reference: &str) -> bool {
        let reference = reference.to_lowercase();
        reference == self.qualified || reference == self.bare
    }
}

/// Percent-decode and trim. Applied exactly once per request, by the validator.
pub fn normalize(raw: &str) -> String {
    percent_decode_str(raw)
        .decode_utf8_lossy()
        .trim()
        .to_string()
}

/// SQL query validator.
#[derive(Debug, Clone, Default)]
pub struct SqlValidator {
    separator: SeparatorPolicy,
    table_restriction: Option<TableRestriction>,
}

impl SqlValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        let validator = Self::new().separator_policy(config.statement_separator);
        match &config.allowed_table {
            Some(table) => validator.restrict_to_table(table),
            None => validator,
        }
    }

    pub fn separator_policy(mut self, policy: SeparatorPolicy) -> Self {
        self.separator = policy;
        self
    }

    pub fn restrict_to_table(mut self, table: &str) -> Self {
        self.table_restriction = Some(TableRestriction::new(table));
        self
    }

    /// The active `;` policy.
    pub fn active_separator_policy(&self) -> SeparatorPolicy {
        self.separator
    }

    pub fn table_restriction(&self) -> Option<&TableRestriction> {
        self.table_restriction.as_ref()
    }

    /// Validate a raw (possibly percent-encoded) query.
    pub fn validate(&self, raw: &str) -> SecurityResult<ValidationVerdict> {
        let query = normalize(raw);
        debug!("Validating query: {}", preview(&query));

        self.check_statement_shape(&query)?;
        self.check_forbidden_tokens(&query)?;
        self.check_table_references(&query)?;

        debug!("Query validation passed");
        Ok(ValidationVerdict {
            normalized_sql: query,
        })
    }

    fn check_statement_shape(&self, query: &str) -> SecurityResult<()> {
        if !SELECT_ONLY.is_match(query) {
            return Err(SecurityError::NotASelect);
        }
        Ok(())
    }

    fn check_forbidden_tokens(&self, query: &str) -> SecurityResult<()> {
        let separator = match self.separator {
            SeparatorPolicy::Forbidden => query.find(';').map(|_| ";"),
            SeparatorPolicy::Allowed => None,
        };

        let token = separator
            .or_else(|| COMMENT_MARKERS.find(query).map(|m| m.as_str()))
            .or_else(|| FORBIDDEN_KEYWORDS.find(query).map(|m| m.as_str()));

        if let Some(token) = token {
            warn!("Forbidden token detected: {}", token);
            return Err(SecurityError::ForbiddenToken {
                token: token.to_lowercase(),
            });
        }
        Ok(())
    }

    fn check_table_references(&self, query: &str) -> SecurityResult<()> {
        let Some(restriction) = &self.table_restriction else {
            return Ok(());
        };

        let mut references = TABLE_REFERENCES
            .captures_iter(query)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .peekable();

        if references.peek().is_none() {
            return Err(SecurityError::NoTableReference);
        }

        for reference in references {
            if !restriction.allows(reference) {
                warn!(
                    "Table reference '{}' outside allow-list ({})",
                    reference,
                    restriction.table()
                );
                return Err(SecurityError::TableNotAllowed {
                    allowed: restriction.table().to_string(),
                    found: reference.to_lowercase(),
                });
            }
        }
        Ok(())
    }
}

fn preview(query: &str) -> &str {
    match query.char_indices().nth(100) {
        Some((idx, _)) => &query[..idx],
        None => query,
    }
}

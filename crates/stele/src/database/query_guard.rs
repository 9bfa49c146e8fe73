// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

//! Structural read-only check applied to every query right before it runs.
//!
//! This is a keyword heuristic, not a SQL parser: it requires a leading
//! `SELECT` and refuses any whole-word match from the denylist. Comment-based
//! keyword obfuscation and dialect-specific vectors are not detected.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::error;

pub const FORBIDDEN_KEYWORDS: [&str; 12] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "SHUTDOWN", "RESTART",
    "KILL", "GRANT", "REVOKE",
];

static DEFAULT_DENYLIST: Lazy<Regex> = Lazy::new(|| {
    build_denylist(FORBIDDEN_KEYWORDS.iter().copied()).expect("static keyword list compiles")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardViolation {
    #[error("Query is empty")]
    Empty,
    #[error("Only SELECT queries are allowed")]
    NotSelect,
    #[error("Forbidden SQL keyword detected: {keyword}. Only SELECT queries are allowed.")]
    ForbiddenKeyword { keyword: String },
}

fn build_denylist<'a>(keywords: impl Iterator<Item = &'a str>) -> Result<Regex, regex::Error> {
    let alternation: Vec<String> = keywords.map(regex::escape).collect();
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternation.join("|")))
}

#[derive(Debug, Clone)]
pub struct ReadOnlyGuard {
    denylist: Regex,
}
impl ReadOnlyGuard {
    pub fn new() -> Self {
        Self {
            denylist: DEFAULT_DENYLIST.clone(),
        }
    }
    /// Extends the fixed denylist. Entries can be added, never removed.
    pub fn with_extra_keywords(extra: &[String]) -> Result<Self, regex::Error> {
        if extra.is_empty() {
            return Ok(Self::new());
        }
        let denylist = build_denylist(
            FORBIDDEN_KEYWORDS
                .iter()
                .copied()
                .chain(extra.iter().map(|k| k.trim())),
        )?;
        Ok(Self { denylist })
    }
    /// Returns the trimmed query when it passes, or the first violation.
    pub fn check<'q>(&self, query: &'q str) -> Result<&'q str, GuardViolation> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(GuardViolation::Empty);
        }
        let starts_with_select = trimmed
            .get(..6)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("select"));
        if !starts_with_select {
            error!("Refusing non-SELECT query");
            return Err(GuardViolation::NotSelect);
        }
        if let Some(found) = self.denylist.find(trimmed) {
            let keyword = found.as_str().to_uppercase();
            error!(keyword = %keyword, "Refusing query containing forbidden keyword");
            return Err(GuardViolation::ForbiddenKeyword { keyword });
        }
        Ok(trimmed)
    }
}
impl Default for ReadOnlyGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_plain_select() {
        let guard = ReadOnlyGuard::new();
        assert_eq!(
            guard.check("  select region from projects \n"),
            Ok("select region from projects")
        );
    }

    #[test]
    fn rejects_non_select_statements() {
        let guard = ReadOnlyGuard::new();
        assert_eq!(guard.check("DELETE FROM projects"), Err(GuardViolation::NotSelect));
        assert_eq!(guard.check("WITH x AS (SELECT 1) SELECT * FROM x"), Err(GuardViolation::NotSelect));
        assert_eq!(guard.check("   "), Err(GuardViolation::Empty));
    }

    #[test]
    fn names_the_offending_keyword() {
        let err = ReadOnlyGuard::new()
            .check("SELECT 1; drop table projects")
            .unwrap_err();
        assert_eq!(
            err,
            GuardViolation::ForbiddenKeyword {
                keyword: "DROP".to_string()
            }
        );
        assert!(err.to_string().contains("DROP"));
    }

    #[test]
    fn keywords_inside_identifiers_are_allowed() {
        let guard = ReadOnlyGuard::new();
        assert!(guard.check("SELECT dropbox_url, created_at, updated_by FROM files").is_ok());
        assert!(guard.check("SELECT * FROM DROPBOX").is_ok());
    }

    #[test]
    fn extra_keywords_extend_the_denylist() {
        let guard = ReadOnlyGuard::with_extra_keywords(&["ATTACH".to_string()]).unwrap();
        assert!(matches!(
            guard.check("SELECT 1; ATTACH DATABASE 'x' AS y"),
            Err(GuardViolation::ForbiddenKeyword { .. })
        ));
        assert!(matches!(
            guard.check("SELECT 1; DROP TABLE t"),
            Err(GuardViolation::ForbiddenKeyword { .. })
        ));
    }

    proptest! {
        #[test]
        fn non_select_prefix_is_always_refused(prefix in "[A-RT-Za-rt-z][A-Za-z]{0,8}", rest in ".{0,40}") {
            let query = format!("{prefix} {rest}");
            prop_assert!(ReadOnlyGuard::new().check(&query).is_err());
        }

        #[test]
        fn denylisted_words_are_always_refused(idx in 0usize..12, lower in any::<bool>()) {
            let keyword = if lower {
                FORBIDDEN_KEYWORDS[idx].to_lowercase()
            } else {
                FORBIDDEN_KEYWORDS[idx].to_string()
            };
            let query = format!("SELECT a FROM t WHERE b = 1 {keyword} c");
            prop_assert_eq!(
                ReadOnlyGuard::new().check(&query),
                Err(GuardViolation::ForbiddenKeyword { keyword: FORBIDDEN_KEYWORDS[idx].to_string() })
            );
        }
    }
}

//! Gate for ad-hoc read queries.
//!
//! The guard looks at the leading keyword of every statement and refuses
//! anything that writes or changes schema. It is a safety net for
//! interactive use, not a sandbox: a data-modifying CTE
//! (`WITH x AS (DELETE ...) SELECT ...`) or a side-effecting function call
//! is not detected. Use a read-only database role where that matters.

use serde::Serialize;

use schemata_core::config::DbType;

use crate::migrations::split::{first_keyword, split_statements_for};

/// Leading keywords refused by default.
pub const BLOCKED_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "TRUNCATE", "CREATE",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Allowed,
    Rejected {
        keyword: Option<String>,
        reason: String,
    },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Statement-prefix classifier.
#[derive(Debug, Clone)]
pub struct QueryGuard {
    blocked: Vec<String>,
    dialect: DbType,
}

impl Default for QueryGuard {
    fn default() -> Self {
        Self {
            blocked: BLOCKED_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            dialect: DbType::default(),
        }
    }
}

impl QueryGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read statement boundaries the way `dialect` does.
    pub fn for_dialect(mut self, dialect: DbType) -> Self {
        self.dialect = dialect;
        self
    }

    /// Also refuse statements starting with `keyword`.
    pub fn block(mut self, keyword: &str) -> Self {
        let keyword = keyword.trim().to_ascii_uppercase();
        if !keyword.is_empty() && !self.blocked.contains(&keyword) {
            self.blocked.push(keyword);
        }
        self
    }

    pub fn check(&self, sql: &str) -> Verdict {
        let statements = split_statements_for(sql, self.dialect);
        if statements.is_empty() {
            return Verdict::Rejected {
                keyword: None,
                reason: "query is empty".to_string(),
            };
        }

        for statement in &statements {
            if let Some(keyword) = first_keyword(statement) {
                if self.blocked.contains(&keyword) {
                    return Verdict::Rejected {
                        reason: format!(
                            "{} statements are not allowed in read-only queries",
                            keyword
                        ),
                        keyword: Some(keyword),
                    };
                }
            }
        }

        Verdict::Allowed
    }
}

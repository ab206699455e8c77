//! Domain allow-list repository and pattern matching.
//!
//! Lookup pulls enabled rows for the requested scope plus the pseudo-scope
//! `global`, ordered by priority; pattern evaluation happens here in Rust
//! so all four pattern types share one implementation.

use regex::Regex;
use uuid::Uuid;

use crate::data::models::{AllowlistEntry, PatternType};
use crate::db::DbContext;
use crate::error::{Error, Result};

/// Wildcard scope matched for every lookup.
pub const GLOBAL_SCOPE: &str = "global";

#[derive(Debug, Clone)]
pub struct NewAllowlistEntry {
    pub scope: String,
    pub pattern: String,
    pub pattern_type: PatternType,
    pub enabled: bool,
    pub priority: i32,
}

pub struct AllowlistOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> AllowlistOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, new: &NewAllowlistEntry) -> Result<AllowlistEntry> {
        let entry = sqlx::query_as::<_, AllowlistEntry>(
            r#"
            INSERT INTO domain_allowlist (scope, pattern, pattern_type, enabled, priority)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&new.scope)
        .bind(&new.pattern)
        .bind(new.pattern_type)
        .bind(new.enabled)
        .bind(new.priority)
        .fetch_one(self.ctx.pool())
        .await?;
        Ok(entry)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<AllowlistEntry> {
        sqlx::query_as::<_, AllowlistEntry>("SELECT * FROM domain_allowlist WHERE id = $1")
            .bind(id)
            .fetch_optional(self.ctx.pool())
            .await?
            .ok_or(Error::not_found("allow-list entry"))
    }

    pub async fn list(&self, scope: &str, limit: i64, offset: i64) -> Result<Vec<AllowlistEntry>> {
        let rows = sqlx::query_as::<_, AllowlistEntry>(
            r#"
            SELECT * FROM domain_allowlist
            WHERE scope = $1
            ORDER BY priority, pattern
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(scope)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM domain_allowlist WHERE id = $1")
            .bind(id)
            .execute(self.ctx.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Enabled entries in `scope` or `global` that match `domain`, ordered
    /// by priority.
    pub async fn get_for_scope(&self, domain: &str, scope: &str) -> Result<Vec<AllowlistEntry>> {
        let rows = sqlx::query_as::<_, AllowlistEntry>(
            r#"
            SELECT * FROM domain_allowlist
            WHERE enabled AND scope IN ($1, $2)
            ORDER BY priority
            "#,
        )
        .bind(scope)
        .bind(GLOBAL_SCOPE)
        .fetch_all(self.ctx.pool())
        .await?;

        Ok(rows
            .into_iter()
            .filter(|entry| pattern_matches(entry.pattern_type, &entry.pattern, domain))
            .collect())
    }
}

/// Evaluate one allow-list pattern against a normalized domain.
pub fn pattern_matches(pattern_type: PatternType, pattern: &str, domain: &str) -> bool {
    let domain = domain.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();

    match pattern_type {
        PatternType::Exact => domain == pattern,
        PatternType::Wildcard => match pattern.strip_prefix("*.") {
            // `*.example.com` covers subdomains and the apex.
            Some(suffix) => domain == suffix || domain.ends_with(&format!(".{suffix}")),
            None => domain == pattern,
        },
        PatternType::Glob => match glob_to_regex(&pattern) {
            Some(re) => re.is_match(&domain),
            None => false,
        },
        // The pattern is a registrable domain; anything at or under it matches.
        PatternType::EtldPlusOne => {
            domain == pattern || domain.ends_with(&format!(".{pattern}"))
        }
    }
}

/// Translate a glob (`*`, `?`) to an anchored regex.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut translated = String::with_capacity(pattern.len() + 8);
    translated.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => translated.push_str(".*"),
            '?' => translated.push('.'),
            _ => translated.push_str(&regex::escape(&ch.to_string())),
        }
    }
    translated.push('$');
    Regex::new(&translated).ok()
}

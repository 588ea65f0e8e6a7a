//! Inbox categorization.
//!
//! New arrivals under `incoming/` are matched against an ordered set of
//! category rules and, on a hit, copied under the matching
//! `categories/<name>/` prefix. The original stays in the inbox. A
//! persisted per-user set of already-processed keys keeps the sweep
//! idempotent across restarts.

use crate::config::CategoryConfig;
use crate::error::Result;
use crate::mail;
use crate::store::{ObjectInfo, ObjectStore};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Header predicate. An empty `values` list matches on presence alone;
/// otherwise any listed substring of the header value matches.
#[derive(Debug, Clone)]
pub struct HeaderRule {
    header: String,
    values: Vec<String>,
}

impl HeaderRule {
    fn new(header: &str, values: &[&str]) -> Self {
        Self {
            header: header.to_lowercase(),
            values: values.iter().map(|v| v.to_lowercase()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Category {
    pub name: String,
    domains: Vec<String>,
    substrings: Vec<String>,
    header_rules: Vec<HeaderRule>,
}

impl Category {
    fn new(name: &str, domains: &[&str], substrings: &[&str], header_rules: Vec<HeaderRule>) -> Self {
        Self {
            name: name.to_string(),
            domains: domains.iter().map(|d| d.to_lowercase()).collect(),
            substrings: substrings.iter().map(|s| s.to_lowercase()).collect(),
            header_rules,
        }
    }

    fn from_config(config: &CategoryConfig) -> Self {
        Self {
            name: config.name.to_lowercase(),
            domains: config.domains.iter().map(|d| d.to_lowercase()).collect(),
            substrings: config.substrings.iter().map(|s| s.to_lowercase()).collect(),
            header_rules: config
                .headers
                .iter()
                .map(|rule| HeaderRule {
                    header: rule.header.to_lowercase(),
                    values: rule.values.iter().map(|v| v.to_lowercase()).collect(),
                })
                .collect(),
        }
    }

    fn matches(&self, from_lower: &str, headers: &HashMap<String, String>) -> bool {
        if self.domains.iter().any(|d| from_lower.contains(d.as_str())) {
            return true;
        }
        if self.substrings.iter().any(|s| from_lower.contains(s.as_str())) {
            return true;
        }
        for rule in &self.header_rules {
            if let Some(value) = headers.get(&rule.header) {
                if rule.values.is_empty() {
                    return true;
                }
                let value_lower = value.to_lowercase();
                if rule.values.iter().any(|v| value_lower.contains(v.as_str())) {
                    return true;
                }
            }
        }
        false
    }
}

/// Ordered rule set. First matching category wins; no match means the
/// message stays in the primary inbox.
#[derive(Debug, Clone)]
pub struct Categorizer {
    categories: Vec<Category>,
}

impl Categorizer {
    /// Built-in rules for the four fixed categories, with per-category
    /// pattern overrides taken from the config. An override replaces the
    /// built-in patterns wholesale; names outside the fixed set are
    /// ignored since the folder table cannot grow.
    pub fn new(overrides: &[CategoryConfig]) -> Self {
        let mut categories = Self::builtin();
        for config in overrides {
            match categories
                .iter_mut()
                .find(|c| c.name.eq_ignore_ascii_case(&config.name))
            {
                Some(category) => *category = Category::from_config(config),
                None => warn!(category = %config.name, "ignoring override for unknown category"),
            }
        }
        Self { categories }
    }

    fn builtin() -> Vec<Category> {
        vec![
            Category::new(
                "social",
                &[
                    "facebook.com",
                    "facebookmail.com",
                    "twitter.com",
                    "x.com",
                    "instagram.com",
                    "linkedin.com",
                    "pinterest.com",
                    "tiktok.com",
                    "nextdoor.com",
                ],
                &[],
                vec![],
            ),
            Category::new(
                "forums",
                &[
                    "googlegroups.com",
                    "groups.io",
                    "discoursemail.com",
                    "reddit.com",
                ],
                &[],
                vec![HeaderRule::new("list-id", &[])],
            ),
            Category::new(
                "updates",
                &[
                    "github.com",
                    "gitlab.com",
                    "atlassian.net",
                    "paypal.com",
                    "stripe.com",
                ],
                &["notification", "no-reply", "alert"],
                vec![],
            ),
            Category::new(
                "promotions",
                &[
                    "groupon.com",
                    "mailchimp.com",
                    "sendgrid.net",
                    "constantcontact.com",
                ],
                &["newsletter", "deals", "offers", "promo", "marketing"],
                vec![
                    HeaderRule::new("list-unsubscribe", &[]),
                    HeaderRule::new("precedence", &["bulk"]),
                    HeaderRule::new("x-campaign", &[]),
                ],
            ),
        ]
    }

    /// First category matching the From value or headers, if any.
    pub fn classify(&self, from: &str, headers: &HashMap<String, String>) -> Option<&str> {
        let from_lower = from.to_lowercase();
        self.categories
            .iter()
            .find(|category| category.matches(&from_lower, headers))
            .map(|category| category.name.as_str())
    }

    /// Run one categorization pass over an inbox listing.
    ///
    /// Keys already in the processed set are skipped. A matched message is
    /// copied under its category prefix and marked processed only once the
    /// copy lands; a failed copy leaves the key eligible for the next
    /// sweep. Unmatched messages are marked processed immediately.
    ///
    /// Failures here never fail the folder load that triggered the sweep.
    pub async fn sweep(
        &self,
        store: &dyn ObjectStore,
        categorized: &mut CategorizedSet,
        listing: &[ObjectInfo],
    ) -> usize {
        let mut copied = 0;
        for object in listing {
            if categorized.contains(&object.key) {
                continue;
            }
            let raw = match store.get(&object.key).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(key = %object.key, error = %e, "skipping uncategorized message");
                    continue;
                }
            };
            let headers = mail::parse_headers(&raw);
            let from = headers.get("from").map(String::as_str).unwrap_or("");
            match self.classify(from, &headers) {
                Some(name) => {
                    let dest = format!("categories/{}/{}", name, basename(&object.key));
                    match store.put(&dest, raw, "message/rfc822").await {
                        Ok(()) => {
                            debug!(key = %object.key, category = %name, "categorized message");
                            categorized.mark(&object.key);
                            copied += 1;
                        }
                        Err(e) => {
                            warn!(key = %object.key, category = %name, error = %e,
                                "category copy failed, will retry next sweep");
                        }
                    }
                }
                None => categorized.mark(&object.key),
            }
        }
        copied
    }
}

fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Per-user set of inbox keys the categorizer has already handled,
/// persisted as `categorized/<user>.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CategorizedSet {
    keys: HashSet<String>,
    #[serde(skip)]
    dirty: bool,
}

impl CategorizedSet {
    fn storage_key(user: &str) -> String {
        format!("categorized/{}.json", user)
    }

    /// Missing or unreadable documents start a fresh set.
    pub async fn load(store: &dyn ObjectStore, user: &str) -> Self {
        match store.get(&Self::storage_key(user)).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn mark(&mut self, key: &str) {
        if self.keys.insert(key.to_string()) {
            self.dirty = true;
        }
    }

    pub async fn persist_if_dirty(&mut self, store: &dyn ObjectStore, user: &str) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let body = serde_json::to_vec(&self)?;
        store.put(&Self::storage_key(user), body, "application/json").await?;
        self.dirty = false;
        Ok(())
    }
}

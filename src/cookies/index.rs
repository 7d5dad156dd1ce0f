//! The aggregated domain index.
//!
//! Maps each domain to its [`CookieDomainGroup`] and keeps a sorted snapshot
//! of the keys for positional access. The snapshot goes stale whenever a
//! group is created or dropped and is rebuilt on the next positional read.
//!
//! A group with no cookies is never kept.

use crate::cookies::cookie::{Browser, Cookie, CookieDomainGroup};
use std::collections::HashMap;

/// What a merge did to the index.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Same cookies as before, nothing touched.
    Unchanged,
    /// Group created or changed; carries the merged group.
    Updated(CookieDomainGroup),
    /// The group lost its last cookie and was dropped.
    Removed,
}

#[derive(Debug, Default)]
pub struct DomainIndex {
    groups: HashMap<String, CookieDomainGroup>,
    sorted: Vec<String>,
    stale: bool,
    cookie_count: usize,
}

impl DomainIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn cookie_count(&self) -> usize {
        self.cookie_count
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn get(&self, domain: &str) -> Option<&CookieDomainGroup> {
        self.groups.get(domain)
    }

    /// Replace everything `browser` contributed to `domain` with `cookies`.
    pub fn replace_browser(
        &mut self,
        browser: Browser,
        domain: &str,
        cookies: Vec<Cookie>,
    ) -> MergeOutcome {
        let Some(group) = self.groups.get_mut(domain) else {
            if cookies.is_empty() {
                return MergeOutcome::Unchanged;
            }
            let group = CookieDomainGroup::with_cookies(domain, cookies);
            self.cookie_count += group.len();
            self.groups.insert(domain.to_string(), group.clone());
            self.stale = true;
            return MergeOutcome::Updated(group);
        };

        let Some((removed, added)) = group.replace_browser(browser, cookies) else {
            return MergeOutcome::Unchanged;
        };
        self.cookie_count = self.cookie_count - removed + added;
        if group.is_empty() {
            self.groups.remove(domain);
            self.stale = true;
            return MergeOutcome::Removed;
        }
        MergeOutcome::Updated(group.clone())
    }

    /// Drop `browser`'s cookies from `domain`. Returns `None` when the browser
    /// had nothing there.
    pub fn remove_browser(&mut self, browser: Browser, domain: &str) -> Option<MergeOutcome> {
        let group = self.groups.get_mut(domain)?;
        let removed = group.remove_browser(browser);
        if removed == 0 {
            return None;
        }
        self.cookie_count -= removed;
        if group.is_empty() {
            self.groups.remove(domain);
            self.stale = true;
            return Some(MergeOutcome::Removed);
        }
        Some(MergeOutcome::Updated(group.clone()))
    }

    /// Remove one specific cookie, dropping its group if it was the last.
    pub fn remove_cookie(&mut self, cookie: &Cookie) -> bool {
        let Some(group) = self.groups.get_mut(&cookie.domain) else {
            return false;
        };
        if !group.remove_cookie(cookie) {
            return false;
        }
        self.cookie_count -= 1;
        if group.is_empty() {
            self.groups.remove(&cookie.domain);
            self.stale = true;
        }
        true
    }

    /// Rebuild the sorted snapshot if it is stale.
    pub fn refresh(&mut self) {
        if !self.stale {
            return;
        }
        self.sorted = self.groups.keys().cloned().collect();
        self.sorted.sort();
        self.stale = false;
    }

    /// Group at `index` in the sorted snapshot. `None` while stale.
    pub fn fresh_domain_at(&self, index: usize) -> Option<&CookieDomainGroup> {
        if self.stale {
            return None;
        }
        self.sorted.get(index).and_then(|domain| self.groups.get(domain))
    }

    /// Group at `index`, rebuilding the snapshot first if needed.
    pub fn domain_at(&mut self, index: usize) -> Option<&CookieDomainGroup> {
        self.refresh();
        self.fresh_domain_at(index)
    }

    /// Sorted domain names.
    pub fn domains(&mut self) -> &[String] {
        self.refresh();
        &self.sorted
    }

    /// All groups, sorted by domain.
    pub fn sorted_groups(&self) -> Vec<&CookieDomainGroup> {
        let mut groups: Vec<&CookieDomainGroup> = self.groups.values().collect();
        groups.sort_by(|a, b| a.domain().cmp(b.domain()));
        groups
    }

    /// Groups matching any whitespace-separated term of `query`, sorted by
    /// domain. A term matches a group when it is a case-insensitive substring
    /// of the domain or of any cookie's name or value; the term `secure` also
    /// matches any group holding a secure cookie. An empty query matches all.
    pub fn search(&self, query: &str) -> Vec<CookieDomainGroup> {
        let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        self.sorted_groups()
            .into_iter()
            .filter(|group| terms.is_empty() || matches_any(group, &terms))
            .cloned()
            .collect()
    }
}

fn matches_any(group: &CookieDomainGroup, terms: &[String]) -> bool {
    let domain = group.domain().to_lowercase();
    terms.iter().any(|term| {
        domain.contains(term.as_str())
            || (term == "secure" && group.has_secure_cookie())
            || group.cookies().iter().any(|c| {
                c.name.to_lowercase().contains(term.as_str())
                    || c.value.to_lowercase().contains(term.as_str())
            })
    })
}

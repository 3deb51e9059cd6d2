//! Process-table locator
//!
//! Processes launched by an earlier invocation are found again purely by
//! their command-line text, the same way `ps | grep -w` would.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::error::FaultResult;
use crate::traits::{CommandRunner, ProcessLocator};

/// Listing of every process as `<pid> <ppid> <args>`
pub const PS_LISTING: &str = "ps -eo pid=,ppid=,args=";

/// Locates processes through `ps` run by a [`CommandRunner`]
pub struct ProcessTable {
    runner: Arc<dyn CommandRunner>,
    own_pid: u32,
}

impl ProcessTable {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            own_pid: std::process::id(),
        }
    }

    /// Override the pid treated as "self" (fluent API)
    pub fn with_own_pid(mut self, pid: u32) -> Self {
        self.own_pid = pid;
        self
    }
}

#[async_trait]
impl ProcessLocator for ProcessTable {
    async fn locate(&self, search: &str) -> FaultResult<Vec<u32>> {
        let listing = self.runner.run_blocking(PS_LISTING).await?;
        let pids = matching_pids(&listing, search, self.own_pid);
        debug!("Located {} process(es) matching '{}': {:?}", pids.len(), search, pids);
        Ok(pids)
    }
}

/// One row of the process listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub ppid: u32,
    pub args: String,
}

/// Parse a `ps -eo pid=,ppid=,args=` listing, skipping malformed rows
pub fn parse_listing(listing: &str) -> Vec<ProcessEntry> {
    listing
        .lines()
        .filter_map(|line| {
            let mut fields = line.trim_start().splitn(3, char::is_whitespace);
            let pid = fields.next()?.parse().ok()?;
            let ppid = fields.next()?.trim().parse().ok()?;
            let args = fields.next()?.trim_start().to_string();
            Some(ProcessEntry { pid, ppid, args })
        })
        .collect()
}

/// `own_pid` and every process above it in the listing.
///
/// Wrappers such as `sudo` or `sh -c` carry the same command line as the
/// invocation itself.
pub fn lineage(entries: &[ProcessEntry], own_pid: u32) -> HashSet<u32> {
    let parents: HashMap<u32, u32> = entries.iter().map(|e| (e.pid, e.ppid)).collect();
    let mut chain = HashSet::new();
    let mut current = own_pid;
    while current != 0 && chain.insert(current) {
        match parents.get(&current) {
            Some(&parent) => current = parent,
            None => break,
        }
    }
    chain
}

/// Full-word matches in `listing`, excluding `own_pid` and its ancestors
pub fn matching_pids(listing: &str, search: &str, own_pid: u32) -> Vec<u32> {
    let entries = parse_listing(listing);
    let excluded = lineage(&entries, own_pid);
    entries
        .into_iter()
        .filter(|entry| !excluded.contains(&entry.pid) && full_word_match(&entry.args, search))
        .map(|entry| entry.pid)
        .collect()
}

/// `grep -w` semantics: some occurrence of `needle` must start at the
/// beginning of `haystack` or after a non-word character, and end at the end
/// of `haystack` or before a non-word character.
pub fn full_word_match(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(start, matched)| {
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !is_word_char(c));
        let after_ok = haystack[start + matched.len()..]
            .chars()
            .next()
            .map_or(true, |c| !is_word_char(c));
        before_ok && after_ok
    })
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

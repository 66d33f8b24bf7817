//! Sequential server names derived from the live server list.
//!
//! Names have the form `<category>-<sequence>-<suffix>` where category is
//! `grey` or `white`. There is no counter store: the next sequence is one past
//! the highest sequence among live servers of either category. Two controllers
//! scanning at the same time can hand out the same name.

use std::sync::LazyLock;

use regex::Regex;

use crate::providers::{ProviderError, ResourceClient, ServerTier};

static MANAGED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(grey|white)-(\d+)-(.*)$").expect("managed name pattern is valid")
});

/// Parsed form of a managed server name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingRecord {
    /// `grey` or `white`.
    pub category: String,
    /// Sequence number.
    pub sequence: u64,
    /// Free-form suffix.
    pub suffix: String,
}

impl NamingRecord {
    /// Parse a server name, returning `None` if it is not a managed name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let caps = MANAGED_NAME.captures(name)?;
        Some(Self {
            category: caps[1].to_string(),
            sequence: caps[2].parse().ok()?,
            suffix: caps[3].to_string(),
        })
    }
}

/// Highest sequence among managed names, `0` if there are none.
pub fn max_sequence<'n>(names: impl IntoIterator<Item = &'n str>) -> u64 {
    names
        .into_iter()
        .filter_map(NamingRecord::parse)
        .map(|record| record.sequence)
        .max()
        .unwrap_or(0)
}

/// Format a managed server name.
#[must_use]
pub fn format_name(tier: ServerTier, sequence: u64, suffix: &str) -> String {
    format!("{}-{sequence}-{suffix}", tier.category())
}

/// Allocates server names by scanning live servers.
pub struct NamingAllocator<'a> {
    client: &'a dyn ResourceClient,
}

impl<'a> NamingAllocator<'a> {
    /// Create an allocator backed by `client`.
    #[must_use]
    pub fn new(client: &'a dyn ResourceClient) -> Self {
        Self { client }
    }

    /// Next free name for `tier`.
    ///
    /// # Errors
    /// Returns error if the server list cannot be read.
    pub async fn next_name(&self, tier: ServerTier, suffix: &str) -> Result<String, ProviderError> {
        let servers = self.client.list_servers().await?;
        let last = max_sequence(servers.iter().map(|s| s.name.as_str()));
        Ok(format_name(tier, last + 1, suffix))
    }
}

use std::collections::BTreeSet;

/// Topic marking a site that uses history-API routing.
pub const SPA_HISTORY_TAG: &str = "routes-history";
/// Topic marking a site that uses hash routing.
pub const SPA_HASH_TAG: &str = "routes-hash";

/// Lower-cased topic set of a repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteTags(BTreeSet<String>);

impl SiteTags {
    pub fn from_topics<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            topics
                .into_iter()
                .map(|topic| topic.as_ref().to_lowercase())
                .collect(),
        )
    }

    /// Client-side routed sites answer unknown paths with their index document.
    pub fn is_spa(&self) -> bool {
        self.contains(SPA_HISTORY_TAG) || self.contains(SPA_HASH_TAG)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

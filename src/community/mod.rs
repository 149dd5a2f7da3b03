pub mod command;
pub mod oracle;
pub mod store;
pub mod subdivider;

use std::hash::Hash;

use ahash::RandomState;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::config::SubdivisionConfig;

/// Community label. Globally unique across all rounds of one run.
pub type Label = usize;

/// document key -> community path
///
/// Every path is append-only; the last entry is the current community.
/// A reverse index from current label to its members is kept alongside so
/// that a bucket can be collected without scanning every document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityAssignment<K>
where
    K: Eq + Hash,
{
    paths: IndexMap<K, Vec<Label>, RandomState>,
    current: IndexMap<Label, IndexSet<K, RandomState>, RandomState>,
}

impl<K> Default for CommunityAssignment<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> CommunityAssignment<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            paths: IndexMap::with_hasher(RandomState::new()),
            current: IndexMap::with_hasher(RandomState::new()),
        }
    }

    /// Append `label` to the path of `key`, creating the path if needed
    pub fn push(&mut self, key: K, label: Label) {
        let path = self.paths.entry(key.clone()).or_default();
        if let Some(&prev) = path.last() {
            if let Some(members) = self.current.get_mut(&prev) {
                members.swap_remove(&key);
                if members.is_empty() {
                    self.current.swap_remove(&prev);
                }
            }
        }
        path.push(label);
        self.current
            .entry(label)
            .or_insert_with(|| IndexSet::with_hasher(RandomState::new()))
            .insert(key);
    }

    pub fn path(&self, key: &K) -> Option<&[Label]> {
        self.paths.get(key).map(|p| p.as_slice())
    }

    /// Current community (last path entry)
    pub fn current(&self, key: &K) -> Option<Label> {
        self.paths.get(key).and_then(|p| p.last().copied())
    }

    /// Documents whose current community is `label`
    pub fn members_of(&self, label: Label) -> Vec<K> {
        self.current
            .get(&label)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn population(&self, label: Label) -> usize {
        self.current.get(&label).map_or(0, |set| set.len())
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &[Label])> {
        self.paths.iter().map(|(k, p)| (k, p.as_slice()))
    }

    /// current label -> documents, documents in insertion order,
    /// labels in order of first appearance
    pub fn communities(&self) -> IndexMap<Label, Vec<K>, RandomState> {
        let mut out: IndexMap<Label, Vec<K>, RandomState> = IndexMap::with_hasher(RandomState::new());
        for (key, path) in &self.paths {
            if let Some(&label) = path.last() {
                out.entry(label).or_default().push(key.clone());
            }
        }
        out
    }

    /// Distinct full paths, first-seen order
    pub fn distinct_paths(&self) -> Vec<Vec<Label>> {
        let mut seen: IndexSet<&[Label], RandomState> = IndexSet::with_hasher(RandomState::new());
        for path in self.paths.values() {
            seen.insert(path.as_slice());
        }
        seen.into_iter().map(|p| p.to_vec()).collect()
    }
}

/// Bucket classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BucketState {
    /// still being counted in the current round
    Pending,
    /// min_population <= count <= max_population
    Successful,
    /// count < min_population
    Orphaned,
    /// count > max_population, waiting on the frontier
    Oversized,
    /// partitioning reproduced the same document set
    Irreducible,
}

impl BucketState {
    pub fn classify(population: usize, config: &SubdivisionConfig) -> Self {
        if population < config.min_population {
            BucketState::Orphaned
        } else if population > config.max_population {
            BucketState::Oversized
        } else {
            BucketState::Successful
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityBucket {
    pub label: Label,
    pub population: usize,
    pub state: BucketState,
    /// bucket this one was split from, `None` for round one
    pub parent: Option<Label>,
    /// round that created the bucket (1-based)
    pub round: usize,
}

/// Frontier entry: an oversized label plus the population of the set whose
/// partitioning produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierEntry {
    pub label: Label,
    pub parent_population: Option<usize>,
}

/// LIFO work queue of oversized labels
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubdivisionFrontier {
    stack: Vec<FrontierEntry>,
}

impl SubdivisionFrontier {
    pub fn new() -> Self {
        Self { stack: Vec::new() }
    }

    pub fn push(&mut self, entry: FrontierEntry) {
        self.stack.push(entry);
    }

    pub fn pop(&mut self) -> Option<FrontierEntry> {
        self.stack.pop()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn contains(&self, label: Label) -> bool {
        self.stack.iter().any(|e| e.label == label)
    }

    /// Labels in pop order (next first)
    pub fn labels(&self) -> Vec<Label> {
        self.stack.iter().rev().map(|e| e.label).collect()
    }
}

/// Monotonic label allocator.
///
/// Offsets are reserved when a round is merged into the assignment, in
/// frontier pop order, by the thread that owns the subdivider. The number of
/// labels a round needs is only known once its oracle call has returned, so
/// nothing is reserved before dispatch and labels stay gap-free.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelCounter {
    issued: usize,
}

impl LabelCounter {
    pub fn new() -> Self {
        Self { issued: 0 }
    }

    /// Reserve `count` consecutive labels and return the first one
    pub fn reserve(&mut self, count: usize) -> Label {
        let first = self.issued;
        self.issued += count;
        first
    }

    /// Total labels issued so far
    pub fn issued(&self) -> usize {
        self.issued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_appends_and_moves_current_membership() {
        let mut a = CommunityAssignment::new();
        a.push("d1", 0);
        a.push("d2", 0);
        a.push("d3", 1);
        assert_eq!(a.population(0), 2);

        a.push("d1", 2);
        assert_eq!(a.path(&"d1"), Some(&[0, 2][..]));
        assert_eq!(a.current(&"d1"), Some(2));
        assert_eq!(a.members_of(0), vec!["d2"]);
        assert_eq!(a.members_of(2), vec!["d1"]);

        a.push("d2", 3);
        // label 0 は誰の current でもなくなる
        assert_eq!(a.population(0), 0);
        assert!(a.members_of(0).is_empty());
    }

    #[test]
    fn communities_and_paths_are_deduplicated() {
        let mut a = CommunityAssignment::new();
        for (doc, path) in [("a", vec![0, 3]), ("b", vec![0, 3]), ("c", vec![1]), ("d", vec![0, 4])] {
            for label in path {
                a.push(doc, label);
            }
        }
        let comms = a.communities();
        assert_eq!(comms.get(&3), Some(&vec!["a", "b"]));
        assert_eq!(comms.get(&1), Some(&vec!["c"]));
        assert_eq!(comms.len(), 3);
        assert_eq!(a.distinct_paths(), vec![vec![0, 3], vec![1], vec![0, 4]]);
    }

    #[test]
    fn classify_uses_inclusive_band() {
        let config = SubdivisionConfig::with_band(4, 6);
        assert_eq!(BucketState::classify(3, &config), BucketState::Orphaned);
        assert_eq!(BucketState::classify(4, &config), BucketState::Successful);
        assert_eq!(BucketState::classify(6, &config), BucketState::Successful);
        assert_eq!(BucketState::classify(7, &config), BucketState::Oversized);
    }

    #[test]
    fn frontier_is_lifo() {
        let mut f = SubdivisionFrontier::new();
        f.push(FrontierEntry { label: 1, parent_population: None });
        f.push(FrontierEntry { label: 5, parent_population: Some(9) });
        assert_eq!(f.labels(), vec![5, 1]);
        assert_eq!(f.pop().map(|e| e.label), Some(5));
        assert!(f.contains(1));
        assert_eq!(f.len(), 1);
    }

    #[test]
    fn label_counter_reserves_disjoint_ranges() {
        let mut counter = LabelCounter::new();
        assert_eq!(counter.reserve(3), 0);
        assert_eq!(counter.reserve(0), 3);
        assert_eq!(counter.reserve(2), 3);
        assert_eq!(counter.issued(), 5);
    }
}

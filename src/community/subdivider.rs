//! Recursive community subdivision.
//!
//! The first round partitions the whole collection. Every bucket above
//! `max_population` goes on a LIFO frontier; each frontier entry is
//! re-partitioned from a freshly computed similarity sub-matrix until the
//! frontier is empty. Labels of later rounds are offset by the number of
//! labels issued so far, so no two rounds ever share a label.
//!
//! A frontier entry whose document set is identical to the set that
//! produced it cannot be split further and is marked irreducible.

use std::{fmt::{Debug, Display}, hash::Hash};

use ahash::RandomState;
use indexmap::{IndexMap, IndexSet};
use num::Num;
use rayon::prelude::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    community::{
        oracle::{partition_with, PartitionOracle, PartitionOutcome, PartitionRequest},
        store::VectorStore,
        BucketState, CommunityAssignment, CommunityBucket, FrontierEntry, Label, LabelCounter, SubdivisionFrontier,
    },
    config::SubdivisionConfig,
    error::{SubdivideError, SubdivideResult},
    similarity::{compare::{Compare, DefaultCompare}, cosine_matrix_self, SimilarityMatrix},
};

/// Where the state machine currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Initial,
    Partitioning,
    Classifying,
    Subdividing,
    Converged,
}

/// Result of a single `step`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// `label` was partitioned into `children` new buckets
    Subdivided { label: Label, children: usize },
    /// `label` reproduced its parent's document set
    Irreducible(Label),
    /// frontier was already empty
    Idle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SubdivisionState<K>
where
    K: Eq + Hash,
{
    phase: Phase,
    assignment: CommunityAssignment<K>,
    /// live buckets only, subdivided ones are dropped
    buckets: IndexMap<Label, CommunityBucket, RandomState>,
    frontier: SubdivisionFrontier,
    counter: LabelCounter,
    rounds: usize,
    irreducible: Vec<Label>,
    subdivided: Vec<Label>,
}

impl<K> SubdivisionState<K>
where
    K: Eq + Hash + Clone,
{
    fn new() -> Self {
        Self {
            phase: Phase::Initial,
            assignment: CommunityAssignment::new(),
            buckets: IndexMap::with_hasher(RandomState::new()),
            frontier: SubdivisionFrontier::new(),
            counter: LabelCounter::new(),
            rounds: 0,
            irreducible: Vec::new(),
            subdivided: Vec::new(),
        }
    }
}

/// Summary of a run, complete or partial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubdivisionReport<K>
where
    K: Eq + Hash,
{
    pub phase: Phase,
    pub rounds_completed: usize,
    pub labels_issued: usize,
    /// frontier labels still waiting, next first
    pub oversized_remaining: Vec<Label>,
    pub irreducible: Vec<Label>,
    pub successful: Vec<Label>,
    pub orphaned: Vec<Label>,
    pub subdivided: Vec<Label>,
    /// current label -> documents
    pub communities: IndexMap<Label, Vec<K>, RandomState>,
    /// distinct community paths, first-seen order
    pub paths: Vec<Vec<Label>>,
    pub max_total_communities: usize,
    pub budget_exceeded: bool,
}

impl<K> SubdivisionReport<K>
where
    K: Eq + Hash,
{
    pub fn is_converged(&self) -> bool {
        self.phase == Phase::Converged
    }

    pub fn community_count(&self) -> usize {
        self.communities.len()
    }
}

impl<K> Display for SubdivisionReport<K>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "phase: {:?}", self.phase)?;
        writeln!(f, "rounds completed: {}", self.rounds_completed)?;
        writeln!(f, "labels issued: {}", self.labels_issued)?;
        write!(f, "communities: {} (budget {}", self.communities.len(), self.max_total_communities)?;
        if self.budget_exceeded {
            write!(f, ", exceeded")?;
        }
        writeln!(f, ")")?;
        writeln!(f, "successful: {:?}", self.successful)?;
        writeln!(f, "orphaned: {:?}", self.orphaned)?;
        writeln!(f, "irreducible: {:?}", self.irreducible)?;
        write!(f, "oversized remaining: {:?}", self.oversized_remaining)
    }
}

/// Partition one bucket: gather vectors, build the self-similarity
/// sub-matrix and ask the oracle.
fn partition_bucket<K, N, S, O>(
    oracle: &O,
    store: &S,
    threshold: f64,
    label: Label,
    members: &[K],
) -> SubdivideResult<PartitionOutcome<K>>
where
    K: Clone + Eq + Hash + Debug,
    N: Num + Copy + Send + Sync,
    S: VectorStore<K, N> + ?Sized,
    O: PartitionOracle<K> + ?Sized,
    DefaultCompare: Compare<N>,
{
    let vectors = store.gather(members)?;
    let matrix = cosine_matrix_self::<N, &[N]>(&vectors)?;
    let request = PartitionRequest {
        ids: members,
        matrix: &matrix,
        threshold,
        parent: Some(label),
    };
    partition_with(oracle, &request).map_err(|source| {
        warn!(label, error = %source, "partition oracle failed");
        SubdivideError::OracleUnavailable { label: Some(label), source }
    })
}

/// Recursive community subdivider.
///
/// Owns the community assignment for the whole run and mutates it in place.
/// A failed round leaves every earlier round intact and puts the failed
/// label back on the frontier, so `resume` continues where it stopped.
pub struct Subdivider<K, O>
where
    K: Eq + Hash,
{
    config: SubdivisionConfig,
    oracle: O,
    state: SubdivisionState<K>,
}

impl<K, O> Subdivider<K, O>
where
    K: Clone + Eq + Hash + Debug,
    O: PartitionOracle<K>,
{
    pub fn new(config: SubdivisionConfig, oracle: O) -> SubdivideResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            oracle,
            state: SubdivisionState::new(),
        })
    }

    pub fn config(&self) -> &SubdivisionConfig {
        &self.config
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Swap the oracle, e.g. to resume against a restarted service
    pub fn set_oracle(&mut self, oracle: O) {
        self.oracle = oracle;
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn rounds(&self) -> usize {
        self.state.rounds
    }

    pub fn assignment(&self) -> &CommunityAssignment<K> {
        &self.state.assignment
    }

    pub fn frontier(&self) -> &SubdivisionFrontier {
        &self.state.frontier
    }

    pub fn bucket(&self, label: Label) -> Option<&CommunityBucket> {
        self.state.buckets.get(&label)
    }

    pub fn buckets(&self) -> impl Iterator<Item = &CommunityBucket> {
        self.state.buckets.values()
    }

    /// Initial round: partition `ids` using their full similarity matrix.
    /// `ids` must be unique; `matrix` must be square and aligned with them.
    pub fn initialize(&mut self, ids: &[K], matrix: &SimilarityMatrix) -> SubdivideResult<()> {
        if self.state.rounds > 0 {
            return Err(SubdivideError::AlreadyInitialized { rounds: self.state.rounds });
        }
        let mut unique: IndexSet<&K, RandomState> = IndexSet::with_capacity_and_hasher(ids.len(), RandomState::new());
        if let Some(dup) = ids.iter().find(|id| !unique.insert(*id)) {
            return Err(SubdivideError::DuplicateDocument(format!("{dup:?}")));
        }
        if matrix.rows() != ids.len() || matrix.cols() != ids.len() {
            return Err(SubdivideError::MatrixShape {
                rows: matrix.rows(),
                cols: matrix.cols(),
                ids: ids.len(),
            });
        }
        info!(documents = ids.len(), "creating initial communities");
        self.state.phase = Phase::Partitioning;
        let request = PartitionRequest {
            ids,
            matrix,
            threshold: self.config.similarity_threshold,
            parent: None,
        };
        match partition_with(&self.oracle, &request) {
            Ok(outcome) => {
                self.merge_round(None, outcome);
                Ok(())
            }
            Err(source) => {
                warn!(error = %source, "partition oracle failed on initial round");
                self.state.phase = Phase::Initial;
                Err(SubdivideError::OracleUnavailable { label: None, source })
            }
        }
    }

    /// Initial round with the matrix computed from `store`
    pub fn initialize_from_store<N, S>(&mut self, store: &S, ids: &[K]) -> SubdivideResult<()>
    where
        N: Num + Copy + Send + Sync,
        S: VectorStore<K, N> + ?Sized,
        DefaultCompare: Compare<N>,
    {
        let vectors = store.gather(ids)?;
        let matrix = cosine_matrix_self::<N, &[N]>(&vectors)?;
        self.initialize(ids, &matrix)
    }

    /// Pop one frontier entry and process it
    pub fn step<N, S>(&mut self, store: &S) -> SubdivideResult<StepOutcome>
    where
        N: Num + Copy + Send + Sync,
        S: VectorStore<K, N> + ?Sized,
        DefaultCompare: Compare<N>,
    {
        if self.state.rounds == 0 {
            return Err(SubdivideError::NotInitialized);
        }
        let Some(entry) = self.state.frontier.pop() else {
            self.state.phase = Phase::Converged;
            return Ok(StepOutcome::Idle);
        };
        let members = self.state.assignment.members_of(entry.label);
        if Self::reproduces_parent(&entry, members.len()) {
            self.mark_irreducible(entry.label, members.len());
            self.state.phase = self.after_step_phase();
            return Ok(StepOutcome::Irreducible(entry.label));
        }

        info!(label = entry.label, population = members.len(), "reducing community");
        self.state.phase = Phase::Partitioning;
        match partition_bucket::<K, N, S, O>(&self.oracle, store, self.config.similarity_threshold, entry.label, &members) {
            Ok(outcome) => {
                let children = outcome.count;
                self.merge_round(Some((entry.label, members.len())), outcome);
                Ok(StepOutcome::Subdivided { label: entry.label, children })
            }
            Err(err) => {
                // 途中結果は何も適用していないので戻すだけ
                self.state.frontier.push(entry);
                self.state.phase = Phase::Subdividing;
                Err(err)
            }
        }
    }

    /// Drain the frontier one entry at a time
    pub fn resume<N, S>(&mut self, store: &S) -> SubdivideResult<SubdivisionReport<K>>
    where
        N: Num + Copy + Send + Sync,
        S: VectorStore<K, N> + ?Sized,
        DefaultCompare: Compare<N>,
    {
        if self.state.rounds == 0 {
            return Err(SubdivideError::NotInitialized);
        }
        while !self.state.frontier.is_empty() {
            self.step(store)?;
        }
        Ok(self.finish())
    }

    /// Initialize from `store` and subdivide to convergence
    pub fn run<N, S>(&mut self, store: &S, ids: &[K]) -> SubdivideResult<SubdivisionReport<K>>
    where
        N: Num + Copy + Send + Sync,
        S: VectorStore<K, N> + ?Sized,
        DefaultCompare: Compare<N>,
    {
        self.initialize_from_store(store, ids)?;
        self.resume(store)
    }

    /// Snapshot of the run so far
    pub fn report(&self) -> SubdivisionReport<K> {
        let mut successful = Vec::new();
        let mut orphaned = Vec::new();
        for bucket in self.state.buckets.values() {
            match bucket.state {
                BucketState::Successful => successful.push(bucket.label),
                BucketState::Orphaned => orphaned.push(bucket.label),
                _ => {}
            }
        }
        let communities = self.state.assignment.communities();
        let budget_exceeded = communities.len() > self.config.max_total_communities;
        SubdivisionReport {
            phase: self.state.phase,
            rounds_completed: self.state.rounds,
            labels_issued: self.state.counter.issued(),
            oversized_remaining: self.state.frontier.labels(),
            irreducible: self.state.irreducible.clone(),
            successful,
            orphaned,
            subdivided: self.state.subdivided.clone(),
            communities,
            paths: self.state.assignment.distinct_paths(),
            max_total_communities: self.config.max_total_communities,
            budget_exceeded,
        }
    }

    /// Child set is always a subset of its parent set, so equal population
    /// means the oracle handed back the very same documents
    fn reproduces_parent(entry: &FrontierEntry, population: usize) -> bool {
        entry.parent_population == Some(population)
    }

    fn mark_irreducible(&mut self, label: Label, population: usize) {
        warn!(label, population, "irreducible community found, moving on");
        if let Some(bucket) = self.state.buckets.get_mut(&label) {
            bucket.state = BucketState::Irreducible;
        }
        self.state.irreducible.push(label);
    }

    fn after_step_phase(&self) -> Phase {
        if self.state.frontier.is_empty() {
            Phase::Converged
        } else {
            Phase::Subdividing
        }
    }

    /// Apply a validated oracle answer: offset labels, append paths,
    /// classify only the buckets created by this round.
    fn merge_round(&mut self, parent: Option<(Label, usize)>, outcome: PartitionOutcome<K>) {
        self.state.phase = Phase::Classifying;
        let round = self.state.rounds + 1;
        let offset = self.state.counter.reserve(outcome.count);
        let new_labels = offset..offset + outcome.count;

        for label in new_labels.clone() {
            self.state.buckets.insert(label, CommunityBucket {
                label,
                population: 0,
                state: BucketState::Pending,
                parent: parent.map(|(p, _)| p),
                round,
            });
        }
        for (key, local) in outcome.labels {
            let label = offset + local;
            self.state.assignment.push(key, label);
            if let Some(bucket) = self.state.buckets.get_mut(&label) {
                bucket.population += 1;
            }
        }
        if let Some((label, _)) = parent {
            self.state.buckets.shift_remove(&label);
            self.state.subdivided.push(label);
        }

        let mut oversized = 0;
        for label in new_labels {
            let Some(bucket) = self.state.buckets.get_mut(&label) else { continue };
            bucket.state = BucketState::classify(bucket.population, &self.config);
            debug!(label, population = bucket.population, state = ?bucket.state, "classified community");
            if bucket.state == BucketState::Oversized {
                oversized += 1;
                self.state.frontier.push(FrontierEntry {
                    label,
                    parent_population: parent.map(|(_, population)| population),
                });
            }
        }

        self.state.rounds = round;
        self.state.phase = self.after_step_phase();
        info!(
            round,
            offset,
            labels = outcome.count,
            oversized,
            remaining = self.state.frontier.len(),
            "round complete"
        );
    }

    fn finish(&mut self) -> SubdivisionReport<K> {
        self.state.phase = Phase::Converged;
        let report = self.report();
        if report.budget_exceeded {
            warn!(
                communities = report.communities.len(),
                budget = self.config.max_total_communities,
                "community budget exceeded"
            );
        }
        info!(
            rounds = report.rounds_completed,
            communities = report.communities.len(),
            irreducible = report.irreducible.len(),
            "subdivision converged"
        );
        report
    }
}

impl<K, O> Subdivider<K, O>
where
    K: Clone + Eq + Hash + Debug + Send + Sync,
    O: PartitionOracle<K> + Sync,
{
    /// Drain the frontier `parallel_batch` entries at a time.
    ///
    /// Oracle calls of one batch run concurrently on disjoint document sets.
    /// Results are merged in pop order; label offsets are reserved from the
    /// label counter at merge time. If an entry fails, it and every later
    /// entry of the batch go back on the frontier untouched.
    pub fn resume_parallel<N, S>(&mut self, store: &S) -> SubdivideResult<SubdivisionReport<K>>
    where
        N: Num + Copy + Send + Sync,
        S: VectorStore<K, N> + Sync + ?Sized,
        DefaultCompare: Compare<N>,
    {
        if self.state.rounds == 0 {
            return Err(SubdivideError::NotInitialized);
        }
        let batch = self.config.parallel_batch.max(1);
        while !self.state.frontier.is_empty() {
            let mut jobs: Vec<(FrontierEntry, Vec<K>)> = Vec::with_capacity(batch);
            while jobs.len() < batch {
                let Some(entry) = self.state.frontier.pop() else { break };
                let members = self.state.assignment.members_of(entry.label);
                if Self::reproduces_parent(&entry, members.len()) {
                    self.mark_irreducible(entry.label, members.len());
                    continue;
                }
                jobs.push((entry, members));
            }
            if jobs.is_empty() {
                continue;
            }

            debug!(batch = jobs.len(), "dispatching partition batch");
            self.state.phase = Phase::Partitioning;
            let oracle = &self.oracle;
            let threshold = self.config.similarity_threshold;
            let results: Vec<SubdivideResult<PartitionOutcome<K>>> = jobs
                .par_iter()
                .map(|(entry, members)| partition_bucket::<K, N, S, O>(oracle, store, threshold, entry.label, members))
                .collect();

            let mut failure = None;
            let mut unmerged = Vec::new();
            for ((entry, members), result) in jobs.into_iter().zip(results) {
                if failure.is_some() {
                    unmerged.push(entry);
                    continue;
                }
                match result {
                    Ok(outcome) => self.merge_round(Some((entry.label, members.len())), outcome),
                    Err(err) => {
                        failure = Some(err);
                        unmerged.push(entry);
                    }
                }
            }
            if let Some(err) = failure {
                // pop 順を保つため逆順で積み直す
                for entry in unmerged.into_iter().rev() {
                    self.state.frontier.push(entry);
                }
                self.state.phase = Phase::Subdividing;
                return Err(err);
            }
        }
        Ok(self.finish())
    }

    /// Initialize from `store` and subdivide with `resume_parallel`
    pub fn run_parallel<N, S>(&mut self, store: &S, ids: &[K]) -> SubdivideResult<SubdivisionReport<K>>
    where
        N: Num + Copy + Send + Sync,
        S: VectorStore<K, N> + Sync + ?Sized,
        DefaultCompare: Compare<N>,
    {
        self.initialize_from_store(store, ids)?;
        self.resume_parallel(store)
    }
}

impl<K, O> Subdivider<K, O>
where
    K: Clone + Eq + Hash + Debug + Serialize + DeserializeOwned,
    O: PartitionOracle<K>,
{
    /// CBOR snapshot of the whole run state
    pub fn checkpoint(&self) -> SubdivideResult<Vec<u8>> {
        Ok(serde_cbor::to_vec(&self.state)?)
    }

    /// Rebuild a subdivider from `checkpoint` output
    pub fn restore(bytes: &[u8], config: SubdivisionConfig, oracle: O) -> SubdivideResult<Self> {
        config.validate()?;
        let state: SubdivisionState<K> = serde_cbor::from_slice(bytes)?;
        info!(rounds = state.rounds, frontier = state.frontier.len(), "restored subdivision checkpoint");
        Ok(Self { config, oracle, state })
    }
}

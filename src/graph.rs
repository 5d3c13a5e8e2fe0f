//! In-memory dependency graph engine (spec.md §4.C).
//!
//! Owns three mappings keyed by job key: forward adjacency
//! (`parent -> children`, the natural topological edge direction — a
//! parent enables its children), reverse adjacency (`child -> parents`),
//! and in-degree (`child -> unsatisfied-parent count`). All three are
//! kept mutually consistent under a single mutation discipline: every
//! write takes the graph's write lock, updates all three maps, and only
//! then releases it. Reads take the read lock and may run concurrently
//! with other reads (spec.md §5).
//!
//! No I/O happens inside the lock. Persisting an edge (or its removal) is
//! the caller's responsibility, done before or after the in-memory
//! mutation — the in-memory update is the commit point for graph shape.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{Result, SchedulerError, Severity, Verdict};

/// How long a memoized cycle-path lookup remains valid.
///
/// Invalidation is time-based, not event-based, by design: a stale
/// "no cycle" entry is safe because the post-commit deadlock sweep in
/// [`DependencyGraph::add_dependency`] always re-runs regardless of cache
/// state (spec.md §4.C caching note).
const CYCLE_CACHE_TTL: Duration = Duration::from_secs(60);

/// Warn when a dependency chain would exceed this depth.
const DEPTH_WARNING_THRESHOLD: usize = 10;

/// Warn when a parent's fan-out (number of direct children) would exceed this.
const FANOUT_WARNING_THRESHOLD: usize = 20;

#[derive(Default)]
struct GraphInner {
    forward: HashMap<u64, HashSet<u64>>,
    reverse: HashMap<u64, HashSet<u64>>,
    in_degree: HashMap<u64, u32>,
    known: HashSet<u64>,
}

struct CacheEntry {
    cached_at: Instant,
    path: Option<Vec<u64>>,
}

/// A detected cycle, tagged with the detector that found it and a
/// severity used only for reporting (spec.md §4.C).
#[derive(Debug, Clone)]
pub struct CycleFinding {
    pub nodes: Vec<u64>,
    pub severity: u8,
    pub detector: &'static str,
}

/// The in-memory DAG of job dependencies.
pub struct DependencyGraph {
    inner: RwLock<GraphInner>,
    cycle_cache: StdMutex<HashMap<(u64, u64), CacheEntry>>,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(GraphInner::default()),
            cycle_cache: StdMutex::new(HashMap::new()),
        }
    }

    /// Register a job key as known to the graph. Must happen before any
    /// dependency referencing it is added.
    pub async fn register_job(&self, key: u64) {
        let mut inner = self.inner.write().await;
        inner.known.insert(key);
        inner.in_degree.entry(key).or_insert(0);
    }

    /// Drop a job from the graph entirely (used when a job is cancelled
    /// or purged). Does not touch other jobs' edges pointing at it; callers
    /// should remove those dependencies first.
    pub async fn remove_job(&self, key: u64) {
        let mut inner = self.inner.write().await;
        inner.known.remove(&key);
        inner.in_degree.remove(&key);
        inner.forward.remove(&key);
        inner.reverse.remove(&key);
    }

    pub async fn in_degree(&self, key: u64) -> u32 {
        self.inner.read().await.in_degree.get(&key).copied().unwrap_or(0)
    }

    /// Add a dependency edge: `child` depends on `parent`.
    ///
    /// Rejects self-loops and missing jobs outright. If the edge already
    /// exists this is a no-op (idempotent). Otherwise cycle detection runs
    /// on the prospective graph; if a cycle would form, the edge is
    /// rejected before anything is mutated. On acceptance, the edge is
    /// committed and a full deadlock sweep re-validates the whole graph;
    /// if that sweep (which can also catch races from concurrent
    /// additions) finds a cycle, the edge is rolled back.
    pub async fn add_dependency(&self, child: u64, parent: u64) -> Result<Verdict> {
        if child == parent {
            return Err(SchedulerError::Validation(format!("self-dependency on job {child}")));
        }

        let mut inner = self.inner.write().await;
        if !inner.known.contains(&child) || !inner.known.contains(&parent) {
            return Err(SchedulerError::NotFound(format!(
                "dependency references unknown job(s): child={child} parent={parent}"
            )));
        }

        if inner.forward.get(&parent).map(|c| c.contains(&child)).unwrap_or(false) {
            return Ok(Verdict::ok("dependency already exists"));
        }

        if let Some(path) = Self::path_exists(&inner, child, parent) {
            self.cache_cycle(child, parent, Some(path.clone()));
            let path_str = render_cycle(&path);
            warn!(child, parent, path = %path_str, "rejected dependency: would create cycle");
            return Err(SchedulerError::CycleDetected { path: path_str, severity: Severity::DFS.0 });
        }

        Self::commit_edge(&mut inner, child, parent);

        // Post-commit deadlock sweep: catches races where two additions
        // passed their individual pre-checks but together close a cycle.
        let findings = Self::sweep_cycles(&inner);
        if let Some(finding) = findings.into_iter().next() {
            Self::rollback_edge(&mut inner, child, parent);
            warn!(child, parent, "rolled back dependency: post-commit sweep found a cycle");
            let path_str = render_cycle(&rotate_to(&finding.nodes, child));
            return Err(SchedulerError::CycleDetected { path: path_str, severity: finding.severity });
        }

        self.cache_cycle(child, parent, None);
        info!(child, parent, "dependency added");
        Ok(Verdict::ok("dependency added").with_affected(vec![child, parent]))
    }

    /// Remove a dependency edge. Decrements `child`'s in-degree with a
    /// floor of zero.
    pub async fn remove_dependency(&self, child: u64, parent: u64) {
        let mut inner = self.inner.write().await;
        Self::rollback_edge(&mut inner, child, parent);
    }

    fn commit_edge(inner: &mut GraphInner, child: u64, parent: u64) {
        inner.forward.entry(parent).or_default().insert(child);
        inner.reverse.entry(child).or_default().insert(parent);
        *inner.in_degree.entry(child).or_insert(0) += 1;
    }

    fn rollback_edge(inner: &mut GraphInner, child: u64, parent: u64) {
        let had_edge = inner.forward.get_mut(&parent).map(|c| c.remove(&child)).unwrap_or(false);
        if let Some(parents) = inner.reverse.get_mut(&child) {
            parents.remove(&parent);
        }
        if had_edge {
            let degree = inner.in_degree.entry(child).or_insert(0);
            *degree = degree.saturating_sub(1);
        }
    }

    /// Parent job `parent` has completed: decrement in-degree of every
    /// child and return those reaching zero whose status is `PENDING`
    /// according to `pending` (supplied by the caller, which owns job
    /// status — this module only owns graph shape).
    pub async fn mark_completed(&self, parent: u64, pending: &HashSet<u64>) -> Vec<u64> {
        let mut inner = self.inner.write().await;
        let children: Vec<u64> = inner.forward.get(&parent).cloned().unwrap_or_default().into_iter().collect();
        let mut newly_ready = Vec::new();
        for child in children {
            let degree = inner.in_degree.entry(child).or_insert(0);
            *degree = degree.saturating_sub(1);
            if *degree == 0 && pending.contains(&child) {
                newly_ready.push(child);
            }
        }
        newly_ready
    }

    /// Jobs with in-degree zero whose status is `PENDING`.
    pub async fn ready_set(&self, pending: &HashSet<u64>) -> Vec<u64> {
        let inner = self.inner.read().await;
        inner
            .known
            .iter()
            .filter(|k| inner.in_degree.get(k).copied().unwrap_or(0) == 0 && pending.contains(k))
            .copied()
            .collect()
    }

    /// Kahn's algorithm. Returns the empty sequence if the graph contains
    /// a cycle (fewer nodes emitted than known nodes).
    pub async fn topological_order(&self) -> Vec<u64> {
        let inner = self.inner.read().await;
        Self::kahn_order(&inner).unwrap_or_default()
    }

    /// Repeated Kahn layering: each inner `Vec<u64>` is a batch of jobs
    /// runnable in parallel with respect to the DAG.
    pub async fn execution_plan(&self) -> Vec<Vec<u64>> {
        let inner = self.inner.read().await;
        let mut remaining_in_degree: HashMap<u64, u32> = inner.known.iter().map(|k| (*k, inner.in_degree.get(k).copied().unwrap_or(0))).collect();
        let mut plan = Vec::new();
        let mut emitted = 0usize;
        loop {
            let layer: Vec<u64> = remaining_in_degree
                .iter()
                .filter(|(_, deg)| **deg == 0)
                .map(|(k, _)| *k)
                .collect();
            if layer.is_empty() {
                break;
            }
            for node in &layer {
                remaining_in_degree.remove(node);
                if let Some(children) = inner.forward.get(node) {
                    for child in children {
                        if let Some(d) = remaining_in_degree.get_mut(child) {
                            *d = d.saturating_sub(1);
                        }
                    }
                }
            }
            emitted += layer.len();
            plan.push(layer);
        }
        if emitted < inner.known.len() {
            warn!("execution plan aborted: graph contains a cycle");
            return Vec::new();
        }
        plan
    }

    fn kahn_order(inner: &GraphInner) -> Option<Vec<u64>> {
        let mut in_degree: HashMap<u64, u32> = inner.known.iter().map(|k| (*k, inner.in_degree.get(k).copied().unwrap_or(0))).collect();
        let mut queue: VecDeque<u64> = in_degree.iter().filter(|(_, d)| **d == 0).map(|(k, _)| *k).collect();
        let mut order = Vec::new();
        while let Some(node) = queue.pop_front() {
            order.push(node);
            if let Some(children) = inner.forward.get(&node) {
                for child in children {
                    if let Some(d) = in_degree.get_mut(child) {
                        *d = d.saturating_sub(1);
                        if *d == 0 {
                            queue.push_back(*child);
                        }
                    }
                }
            }
        }
        if order.len() == inner.known.len() {
            Some(order)
        } else {
            None
        }
    }

    /// Run both in-memory cycle detectors (DFS + Tarjan) and merge with
    /// caller-supplied storage-provided findings, collapsing cycles that
    /// share the same node set.
    pub async fn detect_cycles(&self, storage_cycles: Vec<Vec<u64>>) -> Vec<CycleFinding> {
        let inner = self.inner.read().await;
        let mut findings = Self::sweep_cycles(&inner);
        for nodes in storage_cycles {
            findings.push(CycleFinding { nodes, severity: Severity::STORAGE.0, detector: "storage" });
        }
        dedup_by_node_set(findings)
    }

    fn sweep_cycles(inner: &GraphInner) -> Vec<CycleFinding> {
        let mut findings = Self::dfs_cycles(inner);
        findings.extend(Self::tarjan_sccs(inner));
        dedup_by_node_set(findings)
    }

    /// DFS with a recursion stack: on revisiting a node already on the
    /// stack, the path from that node to the current position is the cycle.
    fn dfs_cycles(inner: &GraphInner) -> Vec<CycleFinding> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            OnStack,
            Done,
        }
        let mut marks: HashMap<u64, Mark> = HashMap::new();
        let mut stack_path: Vec<u64> = Vec::new();
        let mut findings = Vec::new();

        fn visit(
            node: u64,
            inner: &GraphInner,
            marks: &mut HashMap<u64, Mark>,
            stack_path: &mut Vec<u64>,
            findings: &mut Vec<CycleFinding>,
        ) {
            if let Some(Mark::Done) = marks.get(&node) {
                return;
            }
            if let Some(Mark::OnStack) = marks.get(&node) {
                if let Some(pos) = stack_path.iter().position(|n| *n == node) {
                    findings.push(CycleFinding {
                        nodes: stack_path[pos..].to_vec(),
                        severity: Severity::DFS.0,
                        detector: "dfs",
                    });
                }
                return;
            }
            marks.insert(node, Mark::OnStack);
            stack_path.push(node);
            if let Some(children) = inner.forward.get(&node) {
                for child in children {
                    visit(*child, inner, marks, stack_path, findings);
                }
            }
            stack_path.pop();
            marks.insert(node, Mark::Done);
        }

        for node in inner.known.iter().copied() {
            visit(node, inner, &mut marks, &mut stack_path, &mut findings);
        }
        findings
    }

    /// Tarjan's strongly-connected-components. Any SCC of size greater
    /// than one is a cycle.
    fn tarjan_sccs(inner: &GraphInner) -> Vec<CycleFinding> {
        struct Tarjan<'a> {
            inner: &'a GraphInner,
            index_counter: u32,
            indices: HashMap<u64, u32>,
            lowlink: HashMap<u64, u32>,
            on_stack: HashSet<u64>,
            stack: Vec<u64>,
            findings: Vec<CycleFinding>,
        }

        impl<'a> Tarjan<'a> {
            fn strongconnect(&mut self, node: u64) {
                self.indices.insert(node, self.index_counter);
                self.lowlink.insert(node, self.index_counter);
                self.index_counter += 1;
                self.stack.push(node);
                self.on_stack.insert(node);

                if let Some(children) = self.inner.forward.get(&node) {
                    for child in children.clone() {
                        if !self.indices.contains_key(&child) {
                            self.strongconnect(child);
                            let child_low = self.lowlink[&child];
                            let node_low = self.lowlink[&node];
                            self.lowlink.insert(node, node_low.min(child_low));
                        } else if self.on_stack.contains(&child) {
                            let child_idx = self.indices[&child];
                            let node_low = self.lowlink[&node];
                            self.lowlink.insert(node, node_low.min(child_idx));
                        }
                    }
                }

                if self.lowlink[&node] == self.indices[&node] {
                    let mut component = Vec::new();
                    loop {
                        let w = self.stack.pop().unwrap();
                        self.on_stack.remove(&w);
                        component.push(w);
                        if w == node {
                            break;
                        }
                    }
                    if component.len() > 1 {
                        self.findings.push(CycleFinding {
                            nodes: component,
                            severity: Severity::SCC.0,
                            detector: "tarjan",
                        });
                    }
                }
            }
        }

        let mut tarjan = Tarjan {
            inner,
            index_counter: 0,
            indices: HashMap::new(),
            lowlink: HashMap::new(),
            on_stack: HashSet::new(),
            stack: Vec::new(),
            findings: Vec::new(),
        };
        for node in inner.known.iter().copied() {
            if !tarjan.indices.contains_key(&node) {
                tarjan.strongconnect(node);
            }
        }
        tarjan.findings
    }

    /// Dry-run validation for a prospective dependency addition. Never
    /// mutates the graph.
    pub async fn validate_dependency_addition(&self, child: u64, parent: u64) -> Verdict {
        if child == parent {
            return Verdict::rejected(format!("self-dependency on job {child}"), None);
        }

        let inner = self.inner.read().await;
        if !inner.known.contains(&child) || !inner.known.contains(&parent) {
            return Verdict::rejected("one or both jobs are unknown to the graph", None);
        }

        if let Some(cached) = self.cached_cycle(child, parent) {
            if let Some(path) = cached {
                return Verdict::rejected(render_cycle(&path), Some(Severity::DFS.0)).with_affected(path);
            }
        } else if let Some(path) = Self::path_exists(&inner, child, parent) {
            return Verdict::rejected(render_cycle(&path), Some(Severity::DFS.0)).with_affected(path);
        }

        let mut verdict = Verdict::ok("dependency addition is safe").with_affected(vec![child, parent]);

        let depth = Self::chain_depth(&inner, child) + 1;
        if depth > DEPTH_WARNING_THRESHOLD {
            verdict = verdict.with_warning(format!("dependency depth {depth} exceeds {DEPTH_WARNING_THRESHOLD}"));
        }

        let fanout = inner.forward.get(&parent).map(|c| c.len()).unwrap_or(0) + 1;
        if fanout > FANOUT_WARNING_THRESHOLD {
            verdict = verdict.with_warning(format!("fan-out from parent {parent} would reach {fanout}, exceeding {FANOUT_WARNING_THRESHOLD}"));
        }

        verdict
    }

    /// Length of the longest existing dependency chain ending at `node`.
    fn chain_depth(inner: &GraphInner, node: u64) -> usize {
        fn depth(node: u64, inner: &GraphInner, memo: &mut HashMap<u64, usize>) -> usize {
            if let Some(d) = memo.get(&node) {
                return *d;
            }
            let d = inner
                .reverse
                .get(&node)
                .map(|parents| parents.iter().map(|p| depth(*p, inner, memo) + 1).max().unwrap_or(0))
                .unwrap_or(0);
            memo.insert(node, d);
            d
        }
        let mut memo = HashMap::new();
        depth(node, inner, &mut memo)
    }

    /// Is `to` reachable from `from` following forward (parent -> child) edges?
    /// Returns the path `from -> ... -> to` if so.
    fn path_exists(inner: &GraphInner, from: u64, to: u64) -> Option<Vec<u64>> {
        if from == to {
            return Some(vec![from]);
        }
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut parent_of: HashMap<u64, u64> = HashMap::new();
        queue.push_back(from);
        visited.insert(from);
        while let Some(node) = queue.pop_front() {
            if node == to {
                let mut path = vec![to];
                let mut cur = to;
                while let Some(p) = parent_of.get(&cur) {
                    path.push(*p);
                    cur = *p;
                }
                path.reverse();
                return Some(path);
            }
            if let Some(children) = inner.forward.get(&node) {
                for child in children {
                    if visited.insert(*child) {
                        parent_of.insert(*child, node);
                        queue.push_back(*child);
                    }
                }
            }
        }
        None
    }

    fn cache_cycle(&self, child: u64, parent: u64, path: Option<Vec<u64>>) {
        let mut cache = self.cycle_cache.lock().unwrap();
        cache.insert((child, parent), CacheEntry { cached_at: Instant::now(), path });
    }

    fn cached_cycle(&self, child: u64, parent: u64) -> Option<Option<Vec<u64>>> {
        let cache = self.cycle_cache.lock().unwrap();
        cache.get(&(child, parent)).and_then(|entry| {
            if entry.cached_at.elapsed() < CYCLE_CACHE_TTL {
                Some(entry.path.clone())
            } else {
                None
            }
        })
    }
}

fn dedup_by_node_set(findings: Vec<CycleFinding>) -> Vec<CycleFinding> {
    let mut seen: Vec<HashSet<u64>> = Vec::new();
    let mut out = Vec::new();
    for finding in findings {
        let set: HashSet<u64> = finding.nodes.iter().copied().collect();
        if !seen.contains(&set) {
            seen.push(set);
            out.push(finding);
        }
    }
    out
}

/// Rotate a cyclic node list so it starts at `start`, if present.
fn rotate_to(path: &[u64], start: u64) -> Vec<u64> {
    match path.iter().position(|n| *n == start) {
        Some(pos) => path[pos..].iter().chain(path[..pos].iter()).copied().collect(),
        None => path.to_vec(),
    }
}

/// Render a cycle for display in the "depends-on" direction the data
/// model uses (child -> parent), given `path` in forward-adjacency order
/// (`parent -> child`, `path[0]` the designated starting node).
///
/// `path` already forms a closed loop once its last element's forward
/// edge is followed back to `path[0]`; rendering therefore never repeats
/// `path`'s own last node as the "closing" node (spec.md §8.1's worked
/// example `[A, C, B, A]` closes back to the start, `A`, not to a repeat
/// of the rejected edge's parent).
fn render_cycle(path: &[u64]) -> String {
    if path.is_empty() {
        return String::new();
    }
    let mut sequence = vec![path[0]];
    sequence.extend(path[1..].iter().rev().copied());
    sequence.push(path[0]);
    sequence.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn graph_with(nodes: &[u64]) -> DependencyGraph {
        let g = DependencyGraph::new();
        for n in nodes {
            g.register_job(*n).await;
        }
        g
    }

    #[tokio::test]
    async fn rejects_self_loop() {
        let g = graph_with(&[1]).await;
        let err = g.add_dependency(1, 1).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }

    #[tokio::test]
    async fn rejects_missing_job() {
        let g = graph_with(&[1]).await;
        let err = g.add_dependency(1, 99).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
    }

    #[tokio::test]
    async fn adding_same_edge_twice_is_idempotent() {
        let g = graph_with(&[1, 2]).await;
        g.add_dependency(2, 1).await.unwrap();
        let verdict = g.add_dependency(2, 1).await.unwrap();
        assert!(verdict.ok);
        assert_eq!(g.in_degree(2).await, 1);
    }

    #[tokio::test]
    async fn cycle_is_rejected_and_graph_unchanged() {
        // A, B, C. B depends on A, C depends on B. A depends on C would cycle.
        let g = graph_with(&[1, 2, 3]).await; // 1=A, 2=B, 3=C
        g.add_dependency(2, 1).await.unwrap(); // B -> A
        g.add_dependency(3, 2).await.unwrap(); // C -> B
        let err = g.add_dependency(1, 3).await.unwrap_err(); // A -> C, cycle
        match err {
            SchedulerError::CycleDetected { path, severity } => {
                // spec.md §8.1: rejected with cycle path [A, C, B, A].
                assert_eq!(path, "1 -> 3 -> 2 -> 1");
                assert!(severity >= 8);
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
        // graph is unchanged: in-degree of A is still 0
        assert_eq!(g.in_degree(1).await, 0);
    }

    #[tokio::test]
    async fn remove_dependency_restores_graph() {
        let g = graph_with(&[1, 2]).await;
        g.add_dependency(2, 1).await.unwrap();
        assert_eq!(g.in_degree(2).await, 1);
        g.remove_dependency(2, 1).await;
        assert_eq!(g.in_degree(2).await, 0);
    }

    #[tokio::test]
    async fn mark_completed_releases_ready_children() {
        let g = graph_with(&[1, 2]).await;
        g.add_dependency(2, 1).await.unwrap();
        let pending: HashSet<u64> = [2].into_iter().collect();
        let ready = g.mark_completed(1, &pending).await;
        assert_eq!(ready, vec![2]);
        assert_eq!(g.in_degree(2).await, 0);
    }

    #[tokio::test]
    async fn ready_set_is_zero_in_degree_and_pending() {
        let g = graph_with(&[1, 2, 3]).await;
        g.add_dependency(2, 1).await.unwrap();
        let pending: HashSet<u64> = [1, 2, 3].into_iter().collect();
        let mut ready = g.ready_set(&pending).await;
        ready.sort();
        assert_eq!(ready, vec![1, 3]);
    }

    #[tokio::test]
    async fn topological_order_respects_dependency_direction() {
        let g = graph_with(&[1, 2]).await;
        g.add_dependency(2, 1).await.unwrap();
        assert_eq!(g.topological_order().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn execution_plan_batches_parallel_layers() {
        let g = graph_with(&[1, 2, 3]).await;
        g.add_dependency(2, 1).await.unwrap();
        g.add_dependency(3, 1).await.unwrap();
        let plan = g.execution_plan().await;
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0], vec![1]);
        let mut second = plan[1].clone();
        second.sort();
        assert_eq!(second, vec![2, 3]);
    }

    #[tokio::test]
    async fn validate_dependency_addition_warns_on_deep_chain() {
        let nodes: Vec<u64> = (1..=13).collect();
        let g = graph_with(&nodes).await;
        for pair in nodes[..12].windows(2) {
            g.add_dependency(pair[1], pair[0]).await.unwrap();
        }
        let verdict = g.validate_dependency_addition(13, 12).await;
        assert!(verdict.ok);
        assert!(verdict.warnings.iter().any(|w| w.contains("depth")));
    }

    #[tokio::test]
    async fn validate_dependency_addition_warns_on_fanout() {
        let mut nodes = vec![100u64];
        nodes.extend(1..=21);
        let g = graph_with(&nodes).await;
        for child in 1..=20u64 {
            g.add_dependency(child, 100).await.unwrap();
        }
        let verdict = g.validate_dependency_addition(21, 100).await;
        assert!(verdict.ok);
        assert!(verdict.warnings.iter().any(|w| w.contains("fan-out")));
    }

    #[tokio::test]
    async fn detect_cycles_merges_storage_findings() {
        let g = graph_with(&[1, 2]).await;
        let findings = g.detect_cycles(vec![vec![1, 2]]).await;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].detector, "storage");
    }
}

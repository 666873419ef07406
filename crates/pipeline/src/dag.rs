//! Dependency graph of pipeline tasks executed on the rayon pool
//!
//! Nodes declare their predecessors. A node becomes ready once every
//! predecessor has returned successfully, which for pipeline tasks means
//! its output has been published. The first failure stops the graph: nodes
//! that have not started are never run and the failing node is reported
//! with its error.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use landpulse_core::{Error, Result};

/// Cooperative cancellation flag shared between a caller and running jobs
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Error::Cancelled)` once cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// The node that stopped a graph and why
#[derive(Debug)]
pub struct NodeFailure<N> {
    pub node: N,
    pub error: Error,
}

impl<N: fmt::Debug> fmt::Display for NodeFailure<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {:?} failed: {}", self.node, self.error)
    }
}

/// Builder collecting nodes and their predecessors
#[derive(Debug)]
pub struct TaskGraphBuilder<N> {
    nodes: Vec<(N, Vec<N>)>,
}

impl<N> Default for TaskGraphBuilder<N> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<N> TaskGraphBuilder<N>
where
    N: Clone + Eq + Hash + fmt::Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `node`, runnable after every node in `deps`.
    ///
    /// Dependencies may be added later; they are resolved by
    /// [`TaskGraphBuilder::build`].
    pub fn add(&mut self, node: N, deps: Vec<N>) -> &mut Self {
        self.nodes.push((node, deps));
        self
    }

    /// Resolve dependencies and reject duplicates, unknown dependencies and
    /// cycles.
    pub fn build(self) -> Result<TaskGraph<N>> {
        let mut index = HashMap::with_capacity(self.nodes.len());
        for (i, (node, _)) in self.nodes.iter().enumerate() {
            if index.insert(node.clone(), i).is_some() {
                return Err(Error::Algorithm(format!("duplicate task {:?}", node)));
            }
        }

        let mut dependents = vec![Vec::new(); self.nodes.len()];
        let mut indegree = vec![0usize; self.nodes.len()];
        for (i, (node, deps)) in self.nodes.iter().enumerate() {
            for dep in deps {
                let &d = index.get(dep).ok_or_else(|| {
                    Error::Algorithm(format!("task {:?} depends on unknown task {:?}", node, dep))
                })?;
                dependents[d].push(i);
                indegree[i] += 1;
            }
        }

        // Kahn's algorithm: every node must be reachable from a root
        let mut remaining = indegree.clone();
        let mut queue: Vec<usize> = (0..remaining.len()).filter(|&i| remaining[i] == 0).collect();
        let mut visited = 0;
        while let Some(i) = queue.pop() {
            visited += 1;
            for &d in &dependents[i] {
                remaining[d] -= 1;
                if remaining[d] == 0 {
                    queue.push(d);
                }
            }
        }
        if visited != self.nodes.len() {
            let stuck: Vec<&N> = (0..remaining.len())
                .filter(|&i| remaining[i] > 0)
                .map(|i| &self.nodes[i].0)
                .collect();
            return Err(Error::Algorithm(format!("task graph has a cycle through {:?}", stuck)));
        }

        Ok(TaskGraph {
            nodes: self.nodes.into_iter().map(|(n, _)| n).collect(),
            dependents,
            indegree,
        })
    }
}

/// Validated, acyclic task graph
#[derive(Debug)]
pub struct TaskGraph<N> {
    nodes: Vec<N>,
    dependents: Vec<Vec<usize>>,
    indegree: Vec<usize>,
}

/// Shared state of one execution
struct Execution<'a, N, F> {
    graph: &'a TaskGraph<N>,
    run: &'a F,
    cancel: &'a CancelToken,
    pending: Vec<AtomicUsize>,
    stopped: AtomicBool,
    failure: Mutex<Option<NodeFailure<N>>>,
}

impl<N, F> Execution<'_, N, F>
where
    N: Clone + Send + Sync,
    F: Fn(&N) -> Result<()> + Sync,
{
    fn fail(&self, node: &N, error: Error) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Ok(mut slot) = self.failure.lock()
            && slot.is_none()
        {
            *slot = Some(NodeFailure {
                node: node.clone(),
                error,
            });
        }
    }

    fn spawn<'s>(&'s self, scope: &rayon::Scope<'s>, i: usize) {
        scope.spawn(move |scope| {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            let node = &self.graph.nodes[i];
            if let Err(e) = self.cancel.check().and_then(|_| (self.run)(node)) {
                self.fail(node, e);
                return;
            }
            for &d in &self.graph.dependents[i] {
                if self.pending[d].fetch_sub(1, Ordering::SeqCst) == 1 {
                    self.spawn(scope, d);
                }
            }
        });
    }
}

impl<N> TaskGraph<N>
where
    N: Clone + Send + Sync,
{
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[N] {
        &self.nodes
    }

    /// Run every node with `run` on the current rayon pool.
    ///
    /// Ready nodes run concurrently. Returns the first failure; a
    /// cancellation observed before a node starts is reported as that
    /// node failing with [`Error::Cancelled`].
    pub fn execute<F>(&self, cancel: &CancelToken, run: F) -> std::result::Result<(), NodeFailure<N>>
    where
        F: Fn(&N) -> Result<()> + Sync,
    {
        let exec = Execution {
            graph: self,
            run: &run,
            cancel,
            pending: self.indegree.iter().map(|&n| AtomicUsize::new(n)).collect(),
            stopped: AtomicBool::new(false),
            failure: Mutex::new(None),
        };

        rayon::scope(|scope| {
            for i in (0..self.nodes.len()).filter(|&i| self.indegree[i] == 0) {
                exec.spawn(scope, i);
            }
        });

        match exec.failure.into_inner() {
            Ok(Some(failure)) => Err(failure),
            Ok(None) => Ok(()),
            Err(poisoned) => match poisoned.into_inner() {
                Some(failure) => Err(failure),
                None => Ok(()),
            },
        }
    }
}

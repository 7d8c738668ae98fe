mod runner;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::Mode;
use crate::error::GraphError;

pub use crate::engine::runner::{
    Context, Environment, FailurePolicy, LiveReload, Runner, Serve, WatchRule, Watcher,
};

/// Result from a single executed leaf task.
pub type TaskResult = anyhow::Result<()>;

/// A unit of leaf work: one transform, a copy, a deploy.
///
/// Leaves run on a blocking thread, so they are free to do synchronous I/O
/// and CPU heavy work.
pub trait Task: Send + Sync + 'static {
    fn run(&self, ctx: &Context) -> TaskResult;
}

impl<F> Task for F
where
    F: Fn(&Context) -> TaskResult + Send + Sync + 'static,
{
    fn run(&self, ctx: &Context) -> TaskResult {
        self(ctx)
    }
}

/// A type-safe reference to a task registered in a [`Blueprint`].
///
/// Handles are only ever produced by the blueprint, so a composite can never
/// point at a task that does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub(crate) index: NodeIndex,
    owner: usize,
}

/// One member of a sequence.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Run a task and wait for it.
    Run(Handle),
    /// Switch the mode seen by every later step of the same sequence.
    Mode(Mode),
}

impl From<Handle> for Step {
    fn from(handle: Handle) -> Self {
        Step::Run(handle)
    }
}

pub(crate) enum Node {
    Leaf(Arc<dyn Task>),
    Sequence(Vec<Step>),
    Parallel(Vec<Handle>),
}

impl Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Leaf(_) => write!(f, "Leaf(*)"),
            Node::Sequence(steps) => f.debug_tuple("Sequence").field(steps).finish(),
            Node::Parallel(members) => f.debug_tuple("Parallel").field(members).finish(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Entry {
    pub name: String,
    pub node: Node,
}

/// The blueprint of the build.
///
/// Tasks are registered by name and wired together using the [`Handle`]s
/// returned at registration.
///
/// ```rust,no_run
/// use tsukuri::{Blueprint, Context, Mode, Step};
/// use tsukuri::engine::TaskResult;
///
/// fn clean(_: &Context) -> TaskResult { Ok(()) }
/// fn styles(ctx: &Context) -> TaskResult {
///     println!("production: {}", ctx.mode.is_production());
///     Ok(())
/// }
///
/// let mut blueprint = Blueprint::new();
/// let clean = blueprint.leaf("clean", clean)?;
/// let styles = blueprint.leaf("styles", styles)?;
/// blueprint.sequence("build", [clean.into(), Step::Mode(Mode::Production), styles.into()])?;
/// let graph = blueprint.finish()?;
/// assert!(graph.find("build").is_ok());
/// # Ok::<(), tsukuri::GraphError>(())
/// ```
#[derive(Debug)]
pub struct Blueprint {
    graph: Graph<Entry, ()>,
    names: HashMap<String, NodeIndex>,
    id: usize,
}

impl Default for Blueprint {
    fn default() -> Self {
        Self::new()
    }
}

impl Blueprint {
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static NEXT: AtomicUsize = AtomicUsize::new(0);

        Self {
            graph: Graph::new(),
            names: HashMap::new(),
            id: NEXT.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Registers a leaf task.
    pub fn leaf(&mut self, name: &str, task: impl Task) -> Result<Handle, GraphError> {
        self.add(name, Node::Leaf(Arc::new(task)), &[])
    }

    /// Registers a task running `steps` one after another.
    pub fn sequence(
        &mut self,
        name: &str,
        steps: impl IntoIterator<Item = Step>,
    ) -> Result<Handle, GraphError> {
        let steps: Vec<Step> = steps.into_iter().collect();
        let members: Vec<Handle> = steps
            .iter()
            .filter_map(|step| match step {
                Step::Run(handle) => Some(*handle),
                Step::Mode(_) => None,
            })
            .collect();

        self.add(name, Node::Sequence(steps), &members)
    }

    /// Registers a task running `members` concurrently.
    pub fn parallel(
        &mut self,
        name: &str,
        members: impl IntoIterator<Item = Handle>,
    ) -> Result<Handle, GraphError> {
        let members: Vec<Handle> = members.into_iter().collect();
        self.add(name, Node::Parallel(members.clone()), &members)
    }

    /// Looks up an already registered task by name.
    pub fn handle(&self, name: &str) -> Result<Handle, GraphError> {
        self.names
            .get(name)
            .map(|&index| Handle {
                index,
                owner: self.id,
            })
            .ok_or_else(|| GraphError::Undefined(name.to_string()))
    }

    /// Validates the graph and freezes it.
    pub fn finish(self) -> Result<TaskGraph, GraphError> {
        // Handles can only point backwards, this guards against that ever changing.
        petgraph::algo::toposort(&self.graph, None)
            .map_err(|cycle| GraphError::Cycle(self.graph[cycle.node_id()].name.clone()))?;

        Ok(TaskGraph {
            graph: self.graph,
            names: self.names,
            id: self.id,
        })
    }

    fn add(&mut self, name: &str, node: Node, members: &[Handle]) -> Result<Handle, GraphError> {
        if self.names.contains_key(name) {
            return Err(GraphError::Duplicate(name.to_string()));
        }

        let foreign = members
            .iter()
            .any(|m| m.owner != self.id || m.index.index() >= self.graph.node_count());
        if foreign {
            return Err(GraphError::ForeignHandle(name.to_string()));
        }

        let index = self.graph.add_node(Entry {
            name: name.to_string(),
            node,
        });

        for member in members {
            self.graph.update_edge(index, member.index, ());
        }

        self.names.insert(name.to_string(), index);
        Ok(Handle {
            index,
            owner: self.id,
        })
    }
}

/// A validated, immutable graph of named tasks.
#[derive(Debug)]
pub struct TaskGraph {
    pub(crate) graph: Graph<Entry, ()>,
    names: HashMap<String, NodeIndex>,
    id: usize,
}

impl TaskGraph {
    /// Resolves an operator supplied task name.
    pub fn find(&self, name: &str) -> Result<Handle, GraphError> {
        self.names
            .get(name)
            .map(|&index| Handle {
                index,
                owner: self.id,
            })
            .ok_or_else(|| GraphError::Undefined(name.to_string()))
    }

    /// Whether `handle` was issued for this graph.
    pub fn owns(&self, handle: Handle) -> bool {
        handle.owner == self.id && handle.index.index() < self.graph.node_count()
    }

    pub fn name(&self, handle: Handle) -> &str {
        &self.graph[handle.index].name
    }

    /// All task names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.names.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Names of the tasks `handle` is composed of, in declaration order.
    pub fn members(&self, handle: Handle) -> Vec<&str> {
        match &self.graph[handle.index].node {
            Node::Leaf(_) => vec![],
            Node::Parallel(members) => members.iter().map(|m| self.name(*m)).collect(),
            Node::Sequence(steps) => steps
                .iter()
                .filter_map(|step| match step {
                    Step::Run(m) => Some(self.name(*m)),
                    Step::Mode(_) => None,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &Context) -> TaskResult {
        Ok(())
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut bp = Blueprint::new();
        bp.leaf("a", noop).unwrap();

        let err = bp.leaf("a", noop).unwrap_err();
        assert!(matches!(err, GraphError::Duplicate(name) if name == "a"));
    }

    #[test]
    fn test_undefined_name_rejected() {
        let mut bp = Blueprint::new();
        bp.leaf("a", noop).unwrap();

        assert!(matches!(bp.handle("b"), Err(GraphError::Undefined(_))));

        let graph = bp.finish().unwrap();
        assert!(graph.find("a").is_ok());
        assert!(matches!(graph.find("b"), Err(GraphError::Undefined(_))));
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let mut one = Blueprint::new();
        let a = one.leaf("a", noop).unwrap();

        let mut two = Blueprint::new();
        let err = two.parallel("p", [a]).unwrap_err();
        assert!(matches!(err, GraphError::ForeignHandle(_)));
    }

    #[test]
    fn test_members_in_order() {
        let mut bp = Blueprint::new();
        let a = bp.leaf("a", noop).unwrap();
        let b = bp.leaf("b", noop).unwrap();
        let s = bp
            .sequence("s", [b.into(), Step::Mode(Mode::Production), a.into()])
            .unwrap();
        let graph = bp.finish().unwrap();

        assert_eq!(graph.members(s), vec!["b", "a"]);
        assert_eq!(graph.names(), vec!["a", "b", "s"]);
    }
}

mod http;
mod watch;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use console::style;
use indicatif::ProgressStyle;
use petgraph::graph::NodeIndex;
use tokio::task::{JoinError, JoinSet};
use tracing::Span;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::engine::{Handle, Node, Step, Task, TaskGraph};
use crate::error::TaskError;
use crate::io::as_overhead;
use crate::{Layout, Mode};

pub use http::{LiveReload, Serve};
pub use watch::{WatchRule, Watcher};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

static TASK_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed}] {msg}")
        .expect("Error setting progress bar template")
});

/// What a parallel composite does when one of its members fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Let every started member run to completion, then report the failures.
    #[default]
    WaitForAll,
    /// Stop waiting for the remaining members as soon as one fails.
    CancelOnFirstFailure,
}

/// Shared state every task can reach through its [`Context`].
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub layout: Layout,
    pub reload: LiveReload,
}

struct Inner {
    graph: TaskGraph,
    env: Environment,
    policy: FailurePolicy,
    runtime: tokio::runtime::Handle,
}

/// Executes tasks of a [`TaskGraph`].
///
/// Cheap to clone. Must be created from within a tokio runtime, leaves are
/// dispatched to its blocking pool.
#[derive(Clone)]
pub struct Runner {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("tasks", &self.inner.graph.names())
            .field("policy", &self.inner.policy)
            .finish()
    }
}

impl Runner {
    pub fn new(graph: TaskGraph, env: Environment, policy: FailurePolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                graph,
                env,
                policy,
                runtime: tokio::runtime::Handle::current(),
            }),
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.inner.graph
    }

    pub fn env(&self) -> &Environment {
        &self.inner.env
    }

    pub(crate) fn runtime(&self) -> &tokio::runtime::Handle {
        &self.inner.runtime
    }

    /// Runs the task behind `handle` and everything it is composed of.
    pub async fn run(&self, handle: Handle, mode: Mode) -> Result<(), TaskError> {
        if !self.inner.graph.owns(handle) {
            return Err(TaskError::ForeignHandle(handle.index.index()));
        }
        self.run_node(handle.index, mode).await
    }

    fn run_node(&self, index: NodeIndex, mode: Mode) -> BoxFuture<'_, Result<(), TaskError>> {
        Box::pin(async move {
            let entry = &self.inner.graph.graph[index];
            let name = entry.name.as_str();
            let s = Instant::now();

            tracing::info!("Starting '{}'...", style(name).cyan());

            let result = match &entry.node {
                Node::Leaf(task) => self.run_leaf(name, task.clone(), mode).await,
                Node::Sequence(steps) => self.run_sequence(steps, mode).await,
                Node::Parallel(members) => self.run_parallel(name, members, mode).await,
            };

            match result {
                Ok(()) => tracing::info!("Finished '{}' {}", style(name).cyan(), as_overhead(s)),
                Err(_) => tracing::error!("'{}' errored {}", style(name).red(), as_overhead(s)),
            }

            result
        })
    }

    async fn run_leaf(&self, name: &str, task: Arc<dyn Task>, mode: Mode) -> Result<(), TaskError> {
        let span = tracing::info_span!("task", name);
        span.pb_set_style(&TASK_STYLE);
        span.pb_set_message(&format!("Running {name}"));

        let ctx = Context {
            mode,
            runner: self.clone(),
            span: span.clone(),
        };

        let joined = tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            task.run(&ctx)
        })
        .await;

        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(TaskError::Failed {
                task: name.to_string(),
                source,
            }),
            Err(err) => Err(TaskError::Panicked {
                task: name.to_string(),
                message: panic_message(err),
            }),
        }
    }

    async fn run_sequence(&self, steps: &[Step], mut mode: Mode) -> Result<(), TaskError> {
        for step in steps {
            match *step {
                Step::Mode(next) => {
                    tracing::debug!(from = ?mode, to = ?next, "switching mode");
                    mode = next;
                }
                Step::Run(handle) => self.run_node(handle.index, mode).await?,
            }
        }

        Ok(())
    }

    async fn run_parallel(
        &self,
        name: &str,
        members: &[Handle],
        mode: Mode,
    ) -> Result<(), TaskError> {
        let mut set = JoinSet::new();
        for member in members {
            let runner = self.clone();
            let index = member.index;
            set.spawn(async move { runner.run_node(index, mode).await });
        }

        let mut errors = Vec::new();
        while let Some(joined) = set.join_next().await {
            let result = joined.unwrap_or_else(|err| {
                Err(TaskError::Panicked {
                    task: name.to_string(),
                    message: panic_message(err),
                })
            });

            if let Err(err) = result {
                errors.push(err);

                if self.inner.policy == FailurePolicy::CancelOnFirstFailure {
                    set.abort_all();
                    break;
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TaskError::Parallel {
                task: name.to_string(),
                total: members.len(),
                errors,
            })
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return String::from("Task was cancelled");
    }

    let panic = err.into_panic();
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Task panicked: {s}")
    } else {
        String::from("Task panicked with unknown payload")
    }
}

/// Everything a leaf task can see while it runs.
#[derive(Clone)]
pub struct Context {
    /// Variant of the transform to run.
    pub mode: Mode,
    runner: Runner,
    span: Span,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("mode", &self.mode).finish()
    }
}

impl Context {
    pub fn layout(&self) -> &Layout {
        &self.runner.inner.env.layout
    }

    pub fn reload(&self) -> &LiveReload {
        &self.runner.inner.env.reload
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    /// Updates the message next to this task's spinner.
    pub fn progress(&self, message: &str) {
        self.span.pb_set_message(message);
    }

    /// Drives a future to completion from inside a leaf.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runner.runtime().block_on(future)
    }

    /// Runs another task in the current mode and waits for it.
    pub fn invoke(&self, handle: Handle) -> Result<(), TaskError> {
        self.block_on(self.runner.run(handle, self.mode))
    }
}

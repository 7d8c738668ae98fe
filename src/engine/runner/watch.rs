//! Watch mode maps filesystem events to task invocations.
//!
//! Each [`WatchRule`] glob is split into a static root, watched recursively,
//! and an absolute pattern used to match event paths. Events are debounced,
//! then every rule matching a changed path has its task run in the mode the
//! watcher itself runs in.
//!
//! Runs of one task never overlap: while a task is running, further changes
//! queue at most one follow-up run, which picks up every change made in the
//! meantime. Different tasks run concurrently.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::RecursiveMode;
use notify_debouncer_full::new_debouncer;

use crate::engine::{Context, Handle, Task, TaskResult};

/// Re-run `target` whenever a file matching `glob` changes.
#[derive(Debug, Clone)]
pub struct WatchRule {
    pub glob: String,
    pub target: Handle,
}

impl WatchRule {
    pub fn new(glob: impl Into<String>, target: Handle) -> Self {
        Self {
            glob: glob.into(),
            target,
        }
    }
}

/// Long running task that dispatches [`WatchRule`]s.
#[derive(Debug, Clone)]
pub struct Watcher {
    rules: Vec<WatchRule>,
    debounce: Duration,
}

#[derive(Default)]
struct Slot {
    lock: tokio::sync::Mutex<()>,
    queued: AtomicBool,
}

impl Watcher {
    pub fn new(rules: Vec<WatchRule>) -> Self {
        Self {
            rules,
            debounce: Duration::from_millis(250),
        }
    }

    pub fn rules(&self) -> &[WatchRule] {
        &self.rules
    }

    fn dispatch(&self, ctx: &Context, target: Handle, slot: &Arc<Slot>) {
        // A queued run will see this change as well.
        if slot.queued.swap(true, Ordering::AcqRel) {
            return;
        }

        let runner = ctx.runner().clone();
        let slot = slot.clone();
        let mode = ctx.mode;

        ctx.runner().runtime().spawn(async move {
            let _guard = slot.lock.lock().await;
            slot.queued.store(false, Ordering::Release);

            if let Err(e) = runner.run(target, mode).await {
                tracing::error!("{e}");
            }
        });
    }
}

impl Task for Watcher {
    fn run(&self, ctx: &Context) -> TaskResult {
        let mut watched = HashSet::new();
        let mut filters = Vec::new();
        for rule in &self.rules {
            match resolve_watch_path(&rule.glob) {
                Ok((path, pattern)) => {
                    watched.insert(path);
                    filters.push((pattern, rule.target));
                }
                Err(e) => tracing::warn!("not watching {}: {e}", rule.glob),
            }
        }

        let slots: HashMap<Handle, Arc<Slot>> = self
            .rules
            .iter()
            .map(|rule| (rule.target, Arc::default()))
            .collect();

        let (tx, rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer(self.debounce, None, tx)?;

        // Collapse watched paths to reduce the number of watches
        for path in collapse_watch_paths(watched) {
            tracing::info!("watching {}", path);
            debouncer.watch(&path, RecursiveMode::Recursive)?;
        }

        ctx.progress("Watching for changes");

        loop {
            match rx.recv()? {
                Ok(events) => {
                    let paths = events.iter().flat_map(|de| de.event.paths.iter());
                    for target in matching_targets(&filters, paths) {
                        tracing::info!(
                            "change detected, running '{}'",
                            ctx.runner().graph().name(target)
                        );
                        self.dispatch(ctx, target, &slots[&target]);
                    }
                }
                Err(errors) => {
                    for e in errors {
                        tracing::error!("watch error: {e:?}");
                    }
                }
            }
        }
    }
}

/// Targets of every filter matching at least one path, in rule order.
fn matching_targets<'a>(
    filters: &[(Pattern, Handle)],
    paths: impl Iterator<Item = &'a std::path::PathBuf>,
) -> Vec<Handle> {
    let paths: Vec<&Path> = paths.map(|p| p.as_path()).collect();
    let mut targets = Vec::new();

    for (pattern, target) in filters {
        if targets.contains(target) {
            continue;
        }
        if paths.iter().any(|path| pattern.matches_path(path)) {
            targets.push(*target);
        }
    }

    targets
}

/// Splits a glob string into a canonicalized static root path (for
/// watching) and a compiled absolute Pattern (for matching).
fn resolve_watch_path(glob_str: impl AsRef<str>) -> anyhow::Result<(Utf8PathBuf, Pattern)> {
    let path = Utf8Path::new(glob_str.as_ref());

    // Split path into static root and dynamic suffix (containing wildcards)
    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let root_part: Utf8PathBuf = components.iter().take(split_idx).collect();
    let suffix_part: Utf8PathBuf = components.iter().skip(split_idx).collect();

    // Canonicalize the static root (must exist on disk)
    let absolute_root = root_part.canonicalize_utf8()?;

    // A concrete file is watched through its parent so atomic writes are seen.
    let (watch_root, match_path) = if suffix_part.as_str().is_empty() && absolute_root.is_file() {
        let parent = absolute_root
            .parent()
            .unwrap_or(&absolute_root)
            .to_path_buf();
        (parent, absolute_root)
    } else if suffix_part.as_str().is_empty() {
        // A concrete directory matches everything below it.
        let pattern = absolute_root.join("**/*");
        (absolute_root, pattern)
    } else {
        let pattern = absolute_root.join(&suffix_part);
        (absolute_root, pattern)
    };

    let escaped_root = Pattern::escape(watch_root.as_str());
    let pattern = match match_path.strip_prefix(&watch_root) {
        Ok(rest) if !rest.as_str().is_empty() => Pattern::new(&format!("{escaped_root}/{rest}"))?,
        _ => Pattern::new(&Pattern::escape(match_path.as_str()))?,
    };

    Ok((watch_root, pattern))
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::engine::Blueprint;

    fn cwd() -> Utf8PathBuf {
        Utf8PathBuf::try_from(std::env::current_dir().unwrap()).unwrap()
    }

    #[test]
    fn test_concrete_file() {
        let (watch, pattern) = resolve_watch_path("Cargo.toml").expect("Should resolve");

        assert_eq!(watch, cwd());
        assert_eq!(pattern.as_str(), cwd().join("Cargo.toml"));
    }

    #[test]
    fn test_concrete_directory() {
        let (watch, pattern) = resolve_watch_path("src").expect("Should resolve");

        assert_eq!(watch, cwd().join("src"));
        assert_eq!(pattern.as_str(), cwd().join("src/**/*"));
        assert!(pattern.matches_path(cwd().join("src/lib.rs").as_std_path()));
    }

    #[test]
    fn test_directory_wildcard() {
        let (watch, pattern) = resolve_watch_path("src/**/*.rs").expect("Should resolve");

        assert_eq!(watch, cwd().join("src"));
        assert_eq!(pattern.as_str(), cwd().join("src/**/*.rs"));
        assert!(pattern.matches_path(cwd().join("src/engine/mod.rs").as_std_path()));
    }

    #[test]
    fn test_missing_root_fails() {
        assert!(resolve_watch_path("no-such-dir/**/*.scss").is_err());
    }

    #[test]
    fn test_collapse_watch_paths() {
        let paths = HashSet::from([
            Utf8PathBuf::from("/a"),
            Utf8PathBuf::from("/a/b"),
            Utf8PathBuf::from("/a/b/c"),
            Utf8PathBuf::from("/b"),
            Utf8PathBuf::from("/c/d"),
        ]);

        assert_eq!(
            collapse_watch_paths(paths),
            vec![
                Utf8PathBuf::from("/a"),
                Utf8PathBuf::from("/b"),
                Utf8PathBuf::from("/c/d")
            ]
        );
    }

    #[test]
    fn test_collapse_watch_paths_similar_names() {
        let paths = HashSet::from([Utf8PathBuf::from("/foo"), Utf8PathBuf::from("/foo-bar")]);

        assert_eq!(
            collapse_watch_paths(paths),
            vec![Utf8PathBuf::from("/foo"), Utf8PathBuf::from("/foo-bar")]
        );
    }

    #[test]
    fn test_matching_targets_dedup() {
        fn noop(_: &Context) -> TaskResult {
            Ok(())
        }

        let mut bp = Blueprint::new();
        let images = bp.leaf("img:dev", noop).unwrap();
        let sprite = bp.leaf("svgSprite", noop).unwrap();
        let styles = bp.leaf("styles:dev", noop).unwrap();

        let filters = vec![
            (Pattern::new("/p/src/img/**/*.*").unwrap(), images),
            (Pattern::new("/p/src/img/icons/svg/*.svg").unwrap(), sprite),
            (Pattern::new("/p/src/styles/**/*.scss").unwrap(), styles),
            (Pattern::new("/p/src/styles/**/*.sass").unwrap(), styles),
        ];

        let paths = [
            PathBuf::from("/p/src/img/icons/svg/menu.svg"),
            PathBuf::from("/p/src/img/logo.png"),
        ];
        assert_eq!(matching_targets(&filters, paths.iter()), vec![images, sprite]);

        let paths = [
            PathBuf::from("/p/src/styles/main.scss"),
            PathBuf::from("/p/src/styles/old/legacy.sass"),
        ];
        assert_eq!(matching_targets(&filters, paths.iter()), vec![styles]);
    }
}

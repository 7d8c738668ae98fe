use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::engine::{Context, Task, TaskResult};
use crate::error::BundleError;
use crate::{Layout, Mode, io};

/// Bundles every top-level script entry with esbuild.
#[derive(Debug, Clone)]
pub struct Scripts {
    program: String,
}

impl Default for Scripts {
    fn default() -> Self {
        Self::new("esbuild")
    }
}

impl Scripts {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Bundles all entries, returning the outputs written and the entries
    /// that failed.
    pub fn bundle(
        &self,
        layout: &Layout,
        mode: Mode,
    ) -> anyhow::Result<(Vec<Utf8PathBuf>, Vec<BundleError>)> {
        let entries = io::find(&layout.scripts(), "*.js")?;
        let outdir = layout.dist_js();

        let results: Vec<_> = entries
            .into_par_iter()
            .map(|entry| {
                let output = io::rebase(&entry, &layout.scripts(), &outdir);
                self.bundle_one(&entry, &output, mode).map(|_| output)
            })
            .collect();

        let mut written = Vec::new();
        let mut failed = Vec::new();
        for result in results {
            match result {
                Ok(output) => written.push(output),
                Err(e) => failed.push(e),
            }
        }

        Ok((written, failed))
    }

    fn bundle_one(&self, entry: &Utf8Path, output: &Utf8Path, mode: Mode) -> Result<(), BundleError> {
        let mut command = Command::new(&self.program);
        command
            .arg(entry.as_str())
            .arg("--bundle")
            .arg(format!("--outfile={output}"))
            .arg("--log-level=warning")
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        match mode {
            Mode::Development => command.arg("--sourcemap=inline"),
            Mode::Production => command.arg("--minify"),
        };

        let result = command.output().map_err(|source| BundleError::Spawn {
            entry: entry.to_owned(),
            source,
        })?;

        if !result.status.success() {
            return Err(BundleError::Failed {
                entry: entry.to_owned(),
                stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
            });
        }

        Ok(())
    }
}

impl Task for Scripts {
    fn run(&self, ctx: &Context) -> TaskResult {
        let (written, failed) = self.bundle(ctx.layout(), ctx.mode)?;

        // A broken bundle should not take the rest of the build down.
        for e in &failed {
            tracing::error!("{e}");
        }

        tracing::info!("bundled {} scripts, {} failed", written.len(), failed.len());

        if !ctx.mode.is_production() && !written.is_empty() {
            ctx.reload().trigger();
        }

        Ok(())
    }
}

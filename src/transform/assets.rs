use camino::Utf8PathBuf;

use crate::engine::{Context, Task, TaskResult};
use crate::{Layout, io};

/// Copies a file set from the source tree to the output tree unchanged.
#[derive(Debug, Clone, Copy)]
pub struct CopyAssets {
    pub from: fn(&Layout) -> Utf8PathBuf,
    pub pattern: &'static str,
    pub to: fn(&Layout) -> Utf8PathBuf,
}

impl CopyAssets {
    pub fn fonts() -> Self {
        Self {
            from: Layout::fonts,
            pattern: "**/*",
            to: Layout::dist_fonts,
        }
    }

    pub fn images() -> Self {
        Self {
            from: Layout::images,
            pattern: "**/*",
            to: Layout::dist_images,
        }
    }
}

impl Task for CopyAssets {
    fn run(&self, ctx: &Context) -> TaskResult {
        let layout = ctx.layout();
        let (from, to) = ((self.from)(layout), (self.to)(layout));

        let count = io::copy_files(&from, self.pattern, &to)?;
        tracing::info!("copied {count} files from {from} to {to}");

        if !ctx.mode.is_production() && count > 0 {
            ctx.reload().trigger();
        }

        Ok(())
    }
}

/// Removes the whole output tree.
#[derive(Debug, Clone, Copy)]
pub struct Clean;

impl Task for Clean {
    fn run(&self, ctx: &Context) -> TaskResult {
        let dist = &ctx.layout().dist;
        io::remove_dir(dist)?;
        tracing::info!("removed {dist}");
        Ok(())
    }
}

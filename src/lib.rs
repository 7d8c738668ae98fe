#![forbid(unsafe_code)]
//! `tsukuri` wires front-end asset transforms into a graph of named tasks.
//!
//! Leaf tasks render templates, compile stylesheets, bundle scripts, optimise
//! images, assemble an SVG sprite and deploy the output over FTP. Composite
//! tasks run other tasks in sequence or in parallel. The [`Mode`] is threaded
//! through every invocation as a plain value, so a `build` run never leaks
//! production settings into a later `dev` run.

pub mod data;
pub mod deploy;
pub mod engine;
mod error;
pub(crate) mod io;
pub mod pipeline;
pub mod transform;

use camino::Utf8PathBuf;

pub use crate::engine::{
    Blueprint, Context, FailurePolicy, Handle, LiveReload, Runner, Step, Task, TaskGraph,
    WatchRule, Watcher,
};
pub use crate::error::*;
pub use crate::pipeline::Options;

/// Selects which variant of a transform runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Readable output, source maps, live reload.
    #[default]
    Development,
    /// Minified and optimised output.
    Production,
}

impl Mode {
    pub fn is_production(self) -> bool {
        matches!(self, Mode::Production)
    }
}

/// Fixed filesystem layout of a project.
#[derive(Debug, Clone)]
pub struct Layout {
    /// Input root.
    pub src: Utf8PathBuf,
    /// Output root.
    pub dist: Utf8PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Self::new("src", "dist")
    }
}

impl Layout {
    pub fn new(src: impl Into<Utf8PathBuf>, dist: impl Into<Utf8PathBuf>) -> Self {
        Self {
            src: src.into(),
            dist: dist.into(),
        }
    }

    pub fn templates(&self) -> Utf8PathBuf {
        self.src.join("templates")
    }

    /// Data files merged into every template context.
    pub fn data(&self) -> Utf8PathBuf {
        self.templates().join("data")
    }

    pub fn styles(&self) -> Utf8PathBuf {
        self.src.join("styles")
    }

    pub fn scripts(&self) -> Utf8PathBuf {
        self.src.join("js")
    }

    pub fn fonts(&self) -> Utf8PathBuf {
        self.src.join("fonts")
    }

    pub fn images(&self) -> Utf8PathBuf {
        self.src.join("img")
    }

    pub fn icons(&self) -> Utf8PathBuf {
        self.images().join("icons/svg")
    }

    pub fn crop(&self) -> Utf8PathBuf {
        self.images().join("crop")
    }

    pub fn cropped(&self) -> Utf8PathBuf {
        self.images().join("cropped")
    }

    pub fn dist_css(&self) -> Utf8PathBuf {
        self.dist.join("css")
    }

    pub fn dist_js(&self) -> Utf8PathBuf {
        self.dist.join("js")
    }

    pub fn dist_fonts(&self) -> Utf8PathBuf {
        self.dist.join("fonts")
    }

    pub fn dist_images(&self) -> Utf8PathBuf {
        self.dist.join("img")
    }

    pub fn sprite(&self) -> Utf8PathBuf {
        self.dist.join("img/icons/svg/sprite.symbol.svg")
    }
}

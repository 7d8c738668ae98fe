//! The named tasks of a project build.

use camino::Utf8PathBuf;

use crate::deploy::Deploy;
use crate::engine::{Blueprint, Environment, FailurePolicy, Serve, Step, TaskGraph, WatchRule, Watcher};
use crate::error::GraphError;
use crate::transform::{
    Clean, CleanCss, ConcatCss, CopyAssets, Crop, OptimizeImages, PurifyCss, PurifyScope, Scripts,
    Sprite, Styles, Templates,
};
use crate::{Layout, LiveReload, Mode};

/// Everything the task set can be parameterised with.
#[derive(Debug, Clone)]
pub struct Options {
    pub layout: Layout,
    /// Crop box width.
    pub width: Option<u32>,
    /// Crop box height.
    pub height: Option<u32>,
    /// JSON file with the deployment credentials.
    pub credentials: Utf8PathBuf,
    /// HTTP port of the `serve` task.
    pub port: u16,
    /// WebSocket port of the live reload channel.
    pub reload_port: u16,
    /// Concurrent deploy connections.
    pub parallel: usize,
    pub policy: FailurePolicy,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            layout: Layout::default(),
            width: None,
            height: None,
            credentials: "ftp.json".into(),
            port: 3000,
            reload_port: 1337,
            parallel: 10,
            policy: FailurePolicy::default(),
        }
    }
}

impl Options {
    pub fn environment(&self) -> Environment {
        Environment {
            layout: self.layout.clone(),
            reload: LiveReload::new(self.reload_port),
        }
    }
}

/// Registers every task of the build.
pub fn blueprint(options: &Options) -> Result<TaskGraph, GraphError> {
    let mut bp = Blueprint::new();
    let src = &options.layout.src;

    let clean = bp.leaf("clean", Clean)?;
    let clean_css = bp.leaf("clean:css", CleanCss)?;
    let pug = bp.leaf("pug", Templates::default())?;
    let styles_dev = bp.leaf("styles:dev", Styles::Dev)?;
    let styles_build = bp.leaf("styles:build", Styles::Build)?;
    let purify_libs = bp.leaf("purifycss:libs", PurifyCss(PurifyScope::Libs))?;
    let purify_source = bp.leaf("purifycss:source", PurifyCss(PurifyScope::Source))?;
    let concat_css = bp.leaf("concat:css", ConcatCss)?;
    let scripts = bp.leaf("scripts", Scripts::default())?;
    let fonts = bp.leaf("fonts", CopyAssets::fonts())?;
    let img_dev = bp.leaf("img:dev", CopyAssets::images())?;
    let img_build = bp.leaf("img:build", OptimizeImages)?;
    let sprite = bp.leaf("svgSprite", Sprite)?;
    bp.leaf(
        "crop",
        Crop {
            width: options.width,
            height: options.height,
        },
    )?;
    bp.leaf(
        "deploy",
        Deploy {
            credentials: options.credentials.clone(),
            parallel: options.parallel,
        },
    )?;
    let serve = bp.leaf("serve", Serve { port: options.port })?;

    let rules = vec![
        WatchRule::new(format!("{src}/templates/**/*"), pug),
        WatchRule::new(format!("{src}/styles/**/*.scss"), styles_dev),
        WatchRule::new(format!("{src}/styles/**/*.sass"), styles_dev),
        WatchRule::new(format!("{src}/fonts/**/*.*"), fonts),
        WatchRule::new(format!("{src}/img/**/*.*"), img_dev),
        WatchRule::new(format!("{src}/img/icons/svg/*.svg"), sprite),
        WatchRule::new(format!("{src}/js/**/*.js"), scripts),
    ];
    let watch = bp.leaf("watch", Watcher::new(rules))?;

    let build_css = bp.sequence(
        "build:css",
        [purify_libs, purify_source, concat_css, clean_css].map(Step::from),
    )?;

    let dev = bp.parallel("dev", [styles_dev, pug, fonts, img_dev, sprite, scripts])?;

    let assets = bp.parallel(
        "build:assets",
        [styles_build, pug, fonts, img_build, sprite, scripts],
    )?;
    bp.sequence(
        "build",
        [
            Step::Run(clean),
            Step::Mode(Mode::Production),
            Step::Run(assets),
            Step::Run(build_css),
        ],
    )?;

    let live = bp.parallel("live", [watch, serve])?;
    bp.sequence("default", [Step::Run(dev), Step::Run(live)])?;

    bp.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMES: &[&str] = &[
        "clean",
        "clean:css",
        "pug",
        "styles:dev",
        "styles:build",
        "purifycss:libs",
        "purifycss:source",
        "concat:css",
        "build:css",
        "scripts",
        "watch",
        "fonts",
        "img:dev",
        "img:build",
        "crop",
        "svgSprite",
        "deploy",
        "serve",
        "dev",
        "build",
        "default",
    ];

    #[test]
    fn test_every_task_registered() {
        let graph = blueprint(&Options::default()).unwrap();

        for name in NAMES {
            assert!(graph.find(name).is_ok(), "missing task '{name}'");
        }
        assert!(graph.find("styles").is_err());
    }

    #[test]
    fn test_composites() {
        let graph = blueprint(&Options::default()).unwrap();
        let members = |name| graph.members(graph.find(name).unwrap());

        assert_eq!(
            members("dev"),
            vec!["styles:dev", "pug", "fonts", "img:dev", "svgSprite", "scripts"]
        );
        assert_eq!(members("build"), vec!["clean", "build:assets", "build:css"]);
        assert_eq!(
            members("build:assets"),
            vec!["styles:build", "pug", "fonts", "img:build", "svgSprite", "scripts"]
        );
        assert_eq!(
            members("build:css"),
            vec!["purifycss:libs", "purifycss:source", "concat:css", "clean:css"]
        );
        assert_eq!(members("default"), vec!["dev", "live"]);
        assert_eq!(members("live"), vec!["watch", "serve"]);
    }

    #[test]
    fn test_environment_from_options() {
        let options = Options {
            layout: Layout::new("site/src", "site/dist"),
            reload_port: 4000,
            ..Default::default()
        };

        let env = options.environment();

        assert_eq!(env.layout.templates(), "site/src/templates");
        assert_eq!(env.reload.port(), 4000);
    }
}

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use minijinja::Environment;
use serde_json::Value;

use crate::data::{Bundle, ModuleEvaluator, NodeEvaluator, load_bundle};
use crate::engine::{Context, LiveReload, Task, TaskResult};
use crate::error::{ConfigLoadError, TemplateRenderError};
use crate::{Layout, Mode, io};

/// Renders the page templates into the output root.
#[derive(Clone)]
pub struct Templates {
    evaluator: Arc<dyn ModuleEvaluator>,
}

impl Default for Templates {
    fn default() -> Self {
        Self::new(NodeEvaluator::default())
    }
}

impl std::fmt::Debug for Templates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Templates").finish_non_exhaustive()
    }
}

impl Templates {
    pub fn new(evaluator: impl ModuleEvaluator + 'static) -> Self {
        Self {
            evaluator: Arc::new(evaluator),
        }
    }
}

impl Task for Templates {
    fn run(&self, ctx: &Context) -> TaskResult {
        let reload = (!ctx.mode.is_production()).then(|| ctx.reload());
        let report = render(ctx.layout(), ctx.mode, &*self.evaluator, reload)?;

        tracing::info!(
            "rendered {} pages, {} failed",
            report.written.len(),
            report.failed.len()
        );

        if let Some(reload) = reload {
            reload.trigger();
        }

        Ok(())
    }
}

/// Outcome of a template batch.
#[derive(Debug, Default)]
pub struct RenderReport {
    pub written: Vec<Utf8PathBuf>,
    pub failed: Vec<TemplateRenderError>,
}

/// Renders every page template under the layout's template root.
///
/// Data files are loaded anew on each call. A page that fails to render is
/// reported and left unwritten, the rest of the batch still runs. Passing a
/// [`LiveReload`] injects its client into every page.
pub fn render(
    layout: &Layout,
    mode: Mode,
    evaluator: &dyn ModuleEvaluator,
    reload: Option<&LiveReload>,
) -> anyhow::Result<RenderReport> {
    let root = layout.templates();
    let bundle = load_data(&layout.data(), evaluator)?;

    let mut context = Bundle::new();
    context.insert("isProduction".into(), Value::Bool(mode.is_production()));
    context.extend(bundle);

    let mut env = Environment::new();
    env.set_loader(minijinja::path_loader(&root));

    let mut report = RenderReport::default();
    for path in io::find(&root, "**/[!_]*.html")? {
        let name = template_name(&root, &path);

        let html = match env
            .get_template(&name)
            .and_then(|template| template.render(&context))
        {
            Ok(html) => html,
            Err(source) => {
                let error = TemplateRenderError { path, source };
                tracing::warn!("{error}");
                io::notify("Templates", &error.to_string());
                report.failed.push(error);
                continue;
            }
        };

        let html = match reload {
            Some(reload) => reload.inject(&html),
            None => html,
        };

        let output = io::rebase(&path, &root, &layout.dist);
        io::write(&output, html)?;
        report.written.push(output);
    }

    Ok(report)
}

/// A missing data directory is an empty bundle.
fn load_data(dir: &Utf8Path, evaluator: &dyn ModuleEvaluator) -> Result<Bundle, ConfigLoadError> {
    if !dir.is_dir() {
        return Ok(Bundle::new());
    }

    load_bundle(dir, evaluator)
}

/// Loader name of a template, always with forward slashes.
fn template_name(root: &Utf8Path, path: &Utf8Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    struct JsonOnly;

    impl ModuleEvaluator for JsonOnly {
        fn evaluate(&self, path: &Utf8Path) -> Result<Value, ConfigLoadError> {
            Err(ConfigLoadError::Evaluate {
                path: path.to_owned(),
                message: "no scripts in tests".into(),
            })
        }
    }

    fn layout() -> (tempfile::TempDir, Layout) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, Layout::new(root.join("src"), root.join("dist")))
    }

    fn fixture(layout: &Layout) {
        let t = layout.templates();
        io::write(
            &t.join("_layout.html"),
            "<html><body>{% block main %}{% endblock %}</body></html>",
        )
        .unwrap();
        io::write(
            &t.join("index.html"),
            r#"{% extends "_layout.html" %}{% block main %}<h1>{{ site.title }}</h1>{% if isProduction %}prod{% endif %}{% endblock %}"#,
        )
        .unwrap();
        io::write(
            &t.join("blog/post.html"),
            "{% for item in nav %}<a>{{ item }}</a>{% endfor %}",
        )
        .unwrap();
        io::write(&t.join("data/site.json"), r#"{"title": "Hello"}"#).unwrap();
        io::write(&t.join("data/nav.json"), r#"["a", "b"]"#).unwrap();
    }

    #[test]
    fn test_render_production() {
        let (_guard, layout) = layout();
        fixture(&layout);

        let report = render(&layout, Mode::Production, &JsonOnly, None).unwrap();

        assert_eq!(report.written.len(), 2);
        assert!(report.failed.is_empty());

        let index = fs::read_to_string(layout.dist.join("index.html")).unwrap();
        assert_eq!(index, "<html><body><h1>Hello</h1>prod</body></html>");

        let post = fs::read_to_string(layout.dist.join("blog/post.html")).unwrap();
        assert_eq!(post, "<a>a</a><a>b</a>");
        assert!(!layout.dist.join("_layout.html").exists());
    }

    #[test]
    fn test_render_development_injects_reload() {
        let (_guard, layout) = layout();
        fixture(&layout);
        let reload = LiveReload::new(4321);

        render(&layout, Mode::Development, &JsonOnly, Some(&reload)).unwrap();

        let index = fs::read_to_string(layout.dist.join("index.html")).unwrap();
        assert!(!index.contains("prod"));
        assert!(index.contains("ws://localhost:4321"));
        assert!(index.find("<script>").unwrap() < index.find("</body>").unwrap());
    }

    #[test]
    fn test_broken_template_is_skipped() {
        let (_guard, layout) = layout();
        fixture(&layout);
        io::write(&layout.templates().join("broken.html"), "{% if %}").unwrap();

        let report = render(&layout, Mode::Production, &JsonOnly, None).unwrap();

        assert_eq!(report.written.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].path.ends_with("broken.html"));
        assert!(!layout.dist.join("broken.html").exists());
    }

    #[test]
    fn test_missing_data_directory() {
        let (_guard, layout) = layout();
        io::write(&layout.templates().join("plain.html"), "{{ isProduction }}").unwrap();

        render(&layout, Mode::Development, &JsonOnly, None).unwrap();

        let plain = fs::read_to_string(layout.dist.join("plain.html")).unwrap();
        assert_eq!(plain, "False");
    }
}

use std::fs;

use anyhow::Context as _;
use camino::{Utf8Path, Utf8PathBuf};
use grass::{InputSyntax, Options, OutputStyle};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde_json::json;

use crate::Layout;
use crate::engine::{Context, Task, TaskResult};
use crate::error::StyleCompileError;
use crate::io;
use crate::transform::css::{self, Item};

/// Aggregate stylesheet produced by the build.
pub const BUILD_STYLESHEET: &str = "build.css";

/// Sass compilation, readable with source maps or compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Styles {
    Dev,
    Build,
}

impl Task for Styles {
    fn run(&self, ctx: &Context) -> TaskResult {
        let written = compile(ctx.layout(), *self)?;
        tracing::info!("compiled {} stylesheets", written.len());

        if *self == Styles::Dev {
            ctx.reload().trigger();
        }

        Ok(())
    }
}

/// Compiles every non-partial stylesheet under the styles root.
///
/// All entries are attempted; the first failure is returned after the rest
/// have been written.
pub fn compile(layout: &Layout, variant: Styles) -> anyhow::Result<Vec<Utf8PathBuf>> {
    let root = layout.styles();
    let entries: Vec<_> = io::find(&root, "**/[!_]*.scss")?
        .into_iter()
        .chain(io::find(&root, "**/[!_]*.sass")?)
        .collect();

    let results: Vec<_> = entries
        .into_par_iter()
        .map(|entry| compile_one(layout, &entry, variant))
        .collect();

    let total = results.len();
    let mut written = Vec::new();
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(path) => written.push(path),
            Err(e) => {
                tracing::error!("{e}");
                errors.push(e);
            }
        }
    }

    match errors.into_iter().next() {
        None => Ok(written),
        Some(first) => Err(anyhow::Error::from(first).context(format!(
            "{} of {total} stylesheets failed to compile",
            total - written.len()
        ))),
    }
}

fn compile_one(
    layout: &Layout,
    entry: &Utf8Path,
    variant: Styles,
) -> Result<Utf8PathBuf, StyleCompileError> {
    let syntax = match entry.extension() {
        Some("sass") => InputSyntax::Sass,
        _ => InputSyntax::Scss,
    };
    let style = match variant {
        Styles::Dev => OutputStyle::Expanded,
        Styles::Build => OutputStyle::Compressed,
    };

    let options = Options::default().style(style).input_syntax(syntax);
    let css = grass::from_path(entry, &options).map_err(|source| StyleCompileError::Sass {
        path: entry.to_owned(),
        source,
    })?;

    let root = layout.styles();
    let output = io::rebase(entry, &root, &layout.dist_css()).with_extension("css");

    match variant {
        Styles::Build => io::write(&output, css)?,
        Styles::Dev => {
            let file = output.file_name().unwrap_or_default();
            let source = entry.strip_prefix(&root).unwrap_or(entry);
            let map = source_map(file, source, &fs::read_to_string(entry)?);

            io::write(&output.with_extension("css.map"), map)?;
            io::write(
                &output,
                format!("{css}\n/*# sourceMappingURL={file}.map */\n"),
            )?;
        }
    }

    Ok(output)
}

/// A file level source map pointing back at the Sass entry.
fn source_map(file: &str, source: &Utf8Path, content: &str) -> String {
    json!({
        "version": 3,
        "file": file,
        "sourceRoot": "/source/",
        "sources": [source.as_str()],
        "sourcesContent": [content],
        "names": [],
        "mappings": "",
    })
    .to_string()
}

/// Joins stylesheets into one, hoisting `@charset` and `@import` to the top
/// where browsers require them.
pub fn concat(sheets: &[String]) -> String {
    let mut head = String::new();
    let mut body = String::new();
    let mut charset = false;

    for sheet in sheets {
        for item in css::parse(sheet) {
            match item {
                Item::AtStatement(statement) if css::at_name(statement) == "charset" => {
                    if !charset {
                        charset = true;
                        head.insert_str(0, &format!("{statement};\n"));
                    }
                }
                Item::AtStatement(statement) if css::at_name(statement) == "import" => {
                    head.push_str(statement);
                    head.push_str(";\n");
                }
                other => {
                    other.write(&mut body);
                    body.push('\n');
                }
            }
        }
    }

    head + &body
}

/// Concatenates the compiled stylesheets into [`BUILD_STYLESHEET`].
#[derive(Debug, Clone, Copy)]
pub struct ConcatCss;

impl Task for ConcatCss {
    fn run(&self, ctx: &Context) -> TaskResult {
        let dir = ctx.layout().dist_css();
        let mut sheets = Vec::new();
        for path in io::find(&dir, "*.css")? {
            if path.file_name() != Some(BUILD_STYLESHEET) {
                sheets.push(fs::read_to_string(&path).with_context(|| format!("reading {path}"))?);
            }
        }

        io::write(&dir.join(BUILD_STYLESHEET), concat(&sheets))?;
        tracing::info!("concatenated {} stylesheets", sheets.len());
        Ok(())
    }
}

/// Deletes every compiled stylesheet except [`BUILD_STYLESHEET`].
#[derive(Debug, Clone, Copy)]
pub struct CleanCss;

impl Task for CleanCss {
    fn run(&self, ctx: &Context) -> TaskResult {
        for path in io::find(&ctx.layout().dist_css(), "*.css")? {
            if path.file_name() != Some(BUILD_STYLESHEET) {
                fs::remove_file(&path).with_context(|| format!("removing {path}"))?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> (tempfile::TempDir, Layout) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, Layout::new(root.join("src"), root.join("dist")))
    }

    #[test]
    fn test_dev_writes_source_map() {
        let (_guard, layout) = layout();
        io::write(&layout.styles().join("_vars.scss"), "$c: red;").unwrap();
        io::write(
            &layout.styles().join("main.scss"),
            "@import 'vars';\n.a { .b { color: $c; } }",
        )
        .unwrap();

        let written = compile(&layout, Styles::Dev).unwrap();

        assert_eq!(written, vec![layout.dist_css().join("main.css")]);
        let css = fs::read_to_string(layout.dist_css().join("main.css")).unwrap();
        assert!(css.contains(".a .b"));
        assert!(css.contains("sourceMappingURL=main.css.map"));

        let map = fs::read_to_string(layout.dist_css().join("main.css.map")).unwrap();
        let map: serde_json::Value = serde_json::from_str(&map).unwrap();
        assert_eq!(map["sources"][0], "main.scss");
        assert!(!layout.dist_css().join("_vars.css").exists());
    }

    #[test]
    fn test_build_is_compressed_without_map() {
        let (_guard, layout) = layout();
        io::write(&layout.styles().join("main.sass"), ".a\n  color: red\n").unwrap();

        compile(&layout, Styles::Build).unwrap();

        let css = fs::read_to_string(layout.dist_css().join("main.css")).unwrap();
        assert_eq!(css.trim(), ".a{color:red}");
        assert!(!layout.dist_css().join("main.css.map").exists());
    }

    #[test]
    fn test_broken_stylesheet_fails_after_others() {
        let (_guard, layout) = layout();
        io::write(&layout.styles().join("good.scss"), ".a { color: red; }").unwrap();
        io::write(&layout.styles().join("bad.scss"), ".a { color: $missing; }").unwrap();

        let err = compile(&layout, Styles::Build).unwrap_err();

        assert!(err.to_string().contains("1 of 2"));
        assert!(layout.dist_css().join("good.css").exists());
    }

    #[test]
    fn test_concat_hoists_imports() {
        let sheets = vec![
            ".a{color:red}".to_string(),
            "@charset \"utf-8\";@import url(x.css);.b{color:blue}".to_string(),
        ];

        let out = concat(&sheets);

        assert!(out.starts_with("@charset \"utf-8\";\n@import url(x.css);\n"));
        assert!(out.find(".a{color:red}").unwrap() < out.find(".b{color:blue}").unwrap());
    }
}

use std::collections::HashSet;
use std::fs;

use anyhow::Context as _;
use camino::Utf8Path;

use crate::engine::{Context, Task, TaskResult};
use crate::io;
use crate::transform::svg::{self, Root, Tag};

/// Joins the directory parts of an icon path in its symbol id.
pub const SEPARATOR: &str = "--";

/// Root attributes that do not belong on a `<symbol>`.
const DROPPED: &[&str] = &["id", "viewBox", "width", "height", "x", "y", "version"];

/// Combines the icon set into one SVG sprite of `<symbol>` elements.
#[derive(Debug, Clone, Copy)]
pub struct Sprite;

impl Task for Sprite {
    fn run(&self, ctx: &Context) -> TaskResult {
        let layout = ctx.layout();
        let root = layout.icons();

        let mut icons = Vec::new();
        for path in io::find(&root, "**/*.svg")? {
            let source = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            icons.push((symbol_id(&root, &path), source));
        }

        let sprite = build(&icons);
        io::write(&layout.sprite(), sprite)?;
        tracing::info!("packed {} icons into {}", icons.len(), layout.sprite());

        if !ctx.mode.is_production() {
            ctx.reload().trigger();
        }

        Ok(())
    }
}

/// Relative path without extension, directories joined by [`SEPARATOR`].
pub fn symbol_id(root: &Utf8Path, path: &Utf8Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path).with_extension("");
    relative
        .components()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

/// Builds the sprite document from `(id, svg source)` pairs.
///
/// Numbers are rounded to two decimals and ids defined inside an icon are
/// prefixed with its symbol id. Sources without a root `<svg>` element are
/// skipped with a warning.
pub fn build(icons: &[(String, String)]) -> String {
    let mut out = String::from(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink">"#,
    );

    for (id, source) in icons {
        let Some(root) = Root::parse(&svg::compact(source)) else {
            tracing::warn!("icon '{id}' has no <svg> root, skipping");
            continue;
        };

        let mut attrs = vec![("id".to_string(), id.clone())];
        if let Some(view_box) = root.view_box() {
            attrs.push(("viewBox".to_string(), view_box));
        }
        attrs.extend(
            root.tag
                .attrs
                .iter()
                .filter(|(name, _)| !DROPPED.contains(&name.as_str()) && !name.starts_with("xmlns"))
                .cloned(),
        );

        Tag {
            name: "symbol".into(),
            attrs,
            self_closing: false,
        }
        .write(&mut out);
        out.push_str(&namespace(&root.inner, id));
        out.push_str("</symbol>");
    }

    out.push_str("</svg>");
    out
}

/// Prefixes every id defined in `inner` with `symbol`, along with the
/// `href="#…"` and `url(#…)` references to it.
fn namespace(inner: &str, symbol: &str) -> String {
    let ids: HashSet<String> = svg::start_tags(inner)
        .filter_map(|tag| tag.get("id").map(str::to_string))
        .collect();
    if ids.is_empty() {
        return inner.to_string();
    }

    svg::edit_tags(inner, |tag| {
        for (name, value) in &mut tag.attrs {
            match name.as_str() {
                "id" if ids.contains(value.as_str()) => {
                    *value = format!("{symbol}{SEPARATOR}{value}");
                }
                "href" | "xlink:href" => {
                    if let Some(id) = value.strip_prefix('#').filter(|id| ids.contains(*id)) {
                        *value = format!("#{symbol}{SEPARATOR}{id}");
                    }
                }
                _ if value.contains("url(#") => *value = prefix_urls(value, &ids, symbol),
                _ => {}
            }
        }
    })
}

fn prefix_urls(value: &str, ids: &HashSet<String>, symbol: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(at) = rest.find("url(#") {
        let (head, tail) = rest.split_at(at + "url(#".len());
        out.push_str(head);

        let end = tail.find(')').unwrap_or(tail.len());
        let id = &tail[..end];
        if ids.contains(id) {
            out.push_str(symbol);
            out.push_str(SEPARATOR);
        }
        out.push_str(id);
        rest = &tail[end..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_id() {
        let root = Utf8Path::new("src/img/icons/svg");

        assert_eq!(symbol_id(root, &root.join("menu.svg")), "menu");
        assert_eq!(symbol_id(root, &root.join("social/x.svg")), "social--x");
    }

    #[test]
    fn test_build_sprite() {
        let icons = vec![
            (
                "menu".to_string(),
                r#"<?xml version="1.0"?>
<!-- exported -->
<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 24 24" fill="none">
  <title>Menu</title>
  <path d="M0 0h24"/>
</svg>"#
                    .to_string(),
            ),
            (
                "social--x".to_string(),
                r#"<svg xmlns="http://www.w3.org/2000/svg" width="16" height="16"><circle r="8"/></svg>"#
                    .to_string(),
            ),
            ("broken".to_string(), "not an icon".to_string()),
        ];

        let sprite = build(&icons);

        assert_eq!(
            sprite,
            concat!(
                r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink">"#,
                r#"<symbol id="menu" viewBox="0 0 24 24" fill="none"><title>Menu</title><path d="M0 0h24"/></symbol>"#,
                r#"<symbol id="social--x" viewBox="0 0 16 16"><circle r="8"/></symbol>"#,
                "</svg>",
            )
        );
    }

    fn gradient_icon(color: &str) -> String {
        format!(
            r##"<svg viewBox="0 0 2 2"><defs><linearGradient id="g"><stop stop-color="{color}"/></linearGradient></defs><rect fill="url(#g)" width="2" height="2"/><use xlink:href="#g"/><use href="#other"/></svg>"##
        )
    }

    #[test]
    fn test_internal_ids_are_namespaced() {
        let icons = vec![
            ("a".to_string(), gradient_icon("red")),
            ("b".to_string(), gradient_icon("blue")),
        ];

        let sprite = build(&icons);

        assert!(!sprite.contains(r#"id="g""#));
        for symbol in ["a", "b"] {
            assert!(sprite.contains(&format!(r#"<linearGradient id="{symbol}--g">"#)));
            assert!(sprite.contains(&format!(r##"fill="url(#{symbol}--g)""##)));
            assert!(sprite.contains(&format!(r##"<use xlink:href="#{symbol}--g"/>"##)));
        }
        // References to ids the icon does not define are left alone.
        assert_eq!(sprite.matches(r##"href="#other""##).count(), 2);
    }

    #[test]
    fn test_symbols_are_rounded() {
        let icons = vec![(
            "dot".to_string(),
            r#"<svg viewBox="0 0 24.12345 24"><path d="M1.23456 2.5l.33333 0"/></svg>"#.to_string(),
        )];

        let sprite = build(&icons);

        assert!(sprite.contains(r#"<symbol id="dot" viewBox="0 0 24.12 24">"#));
        assert!(sprite.contains(r#"<path d="M1.23 2.5l.33 0"/>"#));
    }

    #[test]
    fn test_sprite_task_output() {
        use crate::engine::{Blueprint, Environment, FailurePolicy, Runner};
        use crate::{Layout, Mode};

        let dir = tempfile::tempdir().unwrap();
        let root = camino::Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let layout = Layout::new(root.join("src"), root.join("dist"));
        io::write(
            &layout.icons().join("arrows/left.svg"),
            r#"<svg viewBox="0 0 8 8"><path d="M8 0L0 4l8 4"/></svg>"#,
        )
        .unwrap();

        let mut bp = Blueprint::new();
        let sprite = bp.leaf("svgSprite", Sprite).unwrap();
        let graph = bp.finish().unwrap();

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let env = Environment {
                layout: layout.clone(),
                ..Default::default()
            };
            let runner = Runner::new(graph, env, FailurePolicy::default());
            runner.run(sprite, Mode::Production).await.unwrap();
        });

        let out = fs::read_to_string(layout.sprite()).unwrap();
        assert!(out.contains(r#"<symbol id="arrows--left" viewBox="0 0 8 8">"#));
    }
}

//! Removal of unused CSS rules.
//!
//! A rule survives when at least one of its selectors only names classes and
//! ids that occur as words in the markup and scripts. Names built from
//! dash-separated fragments (`btn-` + `primary` in a script) count as present
//! when every fragment is present.

use std::collections::HashSet;
use std::fs;

use anyhow::Context as _;
use camino::Utf8PathBuf;

use crate::Layout;
use crate::engine::{Context, Task, TaskResult};
use crate::io;
use crate::transform::css::{self, Item};

/// Stylesheet holding the project's own rules, the rest are libraries.
pub const MAIN_STYLESHEET: &str = "main.css";

/// At-rules whose bodies are lists of ordinary rules.
const CONDITIONAL: &[&str] = &["media", "supports", "document", "layer", "container"];

#[derive(Debug, Clone, Default)]
pub struct Purifier {
    words: HashSet<String>,
}

impl Purifier {
    pub fn from_content<'a>(content: impl IntoIterator<Item = &'a str>) -> Self {
        let mut words = HashSet::new();
        for text in content {
            for word in text.split(|c: char| !is_name_char(c)) {
                if word.is_empty() {
                    continue;
                }
                let word = word.to_ascii_lowercase();
                for part in word.split('-').filter(|part| !part.is_empty()) {
                    words.insert(part.to_string());
                }
                words.insert(word);
            }
        }

        Self { words }
    }

    /// Returns `css` without the rules nothing refers to.
    pub fn purify(&self, css: &str) -> String {
        let mut out = String::with_capacity(css.len());
        self.purify_into(css, &mut out);
        out
    }

    fn purify_into(&self, css: &str, out: &mut String) {
        for item in css::parse(css) {
            match item {
                Item::Rule { prelude, body } => {
                    let kept: Vec<_> = css::split_selectors(prelude)
                        .into_iter()
                        .filter(|selector| self.is_used(selector))
                        .collect();

                    if !kept.is_empty() {
                        let prelude = kept.join(",");
                        Item::Rule {
                            prelude: &prelude,
                            body,
                        }
                        .write(out);
                        out.push('\n');
                    }
                }
                Item::AtBlock { prelude, body } if CONDITIONAL.contains(&&*css::at_name(prelude)) => {
                    let inner = self.purify(body);
                    if !inner.trim().is_empty() {
                        Item::AtBlock {
                            prelude,
                            body: &inner,
                        }
                        .write(out);
                        out.push('\n');
                    }
                }
                other => {
                    other.write(out);
                    out.push('\n');
                }
            }
        }
    }

    fn is_used(&self, selector: &str) -> bool {
        selector_names(selector)
            .iter()
            .all(|name| self.has_word(name))
    }

    fn has_word(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.words.contains(&name)
            || name
                .split('-')
                .filter(|part| !part.is_empty())
                .all(|part| self.words.contains(part))
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Class and id names a selector requires, ignoring anything inside
/// attribute brackets or pseudo-class arguments.
fn selector_names(selector: &str) -> Vec<&str> {
    let bytes = selector.as_bytes();
    let mut names = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            b'\\' => i += 1,
            b'.' | b'#' if depth == 0 => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && is_name_char(bytes[end] as char) {
                    end += 1;
                }
                if end > start {
                    names.push(&selector[start..end]);
                }
                i = end;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    names
}

/// Which stylesheets in the output directory a purify pass rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurifyScope {
    /// Everything except [`MAIN_STYLESHEET`].
    Libs,
    /// Only [`MAIN_STYLESHEET`].
    Source,
}

/// Purifies compiled stylesheets against the built scripts and pages.
#[derive(Debug, Clone, Copy)]
pub struct PurifyCss(pub PurifyScope);

impl PurifyCss {
    fn targets(&self, layout: &Layout) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let sheets = io::find(&layout.dist_css(), "*.css")?;
        Ok(sheets
            .into_iter()
            .filter(|path| {
                let main = path.file_name() == Some(MAIN_STYLESHEET);
                match self.0 {
                    PurifyScope::Libs => !main,
                    PurifyScope::Source => main,
                }
            })
            .collect())
    }
}

impl Task for PurifyCss {
    fn run(&self, ctx: &Context) -> TaskResult {
        let layout = ctx.layout();

        let mut content = Vec::new();
        let sources = io::find(&layout.dist_js(), "*.js")?
            .into_iter()
            .chain(io::find(&layout.dist, "**/*.html")?);
        for path in sources {
            content.push(fs::read_to_string(&path).with_context(|| format!("reading {path}"))?);
        }

        let purifier = Purifier::from_content(content.iter().map(String::as_str));

        for sheet in self.targets(layout)? {
            let css = fs::read_to_string(&sheet).with_context(|| format!("reading {sheet}"))?;
            let purified = purifier.purify(&css);
            tracing::info!(
                "purified {} ({} -> {} bytes)",
                sheet,
                css.len(),
                purified.len()
            );
            io::write(&sheet, purified)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn purifier(content: &str) -> Purifier {
        Purifier::from_content([content])
    }

    #[test]
    fn test_unused_class_removed() {
        let p = purifier(r#"<div class="card"><p id="lead">x</p></div>"#);
        let css = ".card{padding:1px}.unused{color:red}#lead{margin:0}#gone{margin:1px}";

        let out = p.purify(css);

        assert!(out.contains(".card{padding:1px}"));
        assert!(out.contains("#lead{margin:0}"));
        assert!(!out.contains("unused"));
        assert!(!out.contains("gone"));
    }

    #[test]
    fn test_selector_list_is_filtered() {
        let p = purifier(r#"<a class="btn">"#);

        let out = p.purify(".btn,.nope{color:red}");

        assert_eq!(out.trim(), ".btn{color:red}");
    }

    #[test]
    fn test_elements_and_at_rules_kept() {
        let p = purifier("");
        let css = "html,body{margin:0}*{box-sizing:border-box}:root{--x:1}\
                   @font-face{font-family:f}@keyframes spin{from{opacity:0}}";

        let out = p.purify(css);

        assert!(out.contains("html,body{margin:0}"));
        assert!(out.contains("*{box-sizing:border-box}"));
        assert!(out.contains(":root{--x:1}"));
        assert!(out.contains("@font-face{font-family:f}"));
        assert!(out.contains("@keyframes spin{from{opacity:0}}"));
    }

    #[test]
    fn test_empty_media_dropped() {
        let p = purifier(r#"<i class="icon">"#);
        let css = "@media (min-width:1px){.gone{color:red}}@media print{.icon{display:none}}";

        let out = p.purify(css);

        assert!(!out.contains("min-width"));
        assert!(out.contains("@media print{.icon{display:none}\n}"));
    }

    #[test]
    fn test_dynamic_names_from_scripts() {
        let p = purifier(r#"el.classList.add("is-" + state); const state = "open";"#);

        let out = p.purify(".is-open{display:block}.is-closed{display:none}");

        assert!(out.contains(".is-open"));
        assert!(!out.contains(".is-closed"));
    }

    #[test]
    fn test_pseudo_arguments_ignored() {
        assert_eq!(selector_names(".a:not(.b) > #c[data-x=\".d\"]"), vec!["a", "c"]);
        assert_eq!(selector_names("ul li::before"), Vec::<&str>::new());
    }
}

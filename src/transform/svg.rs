//! Tag level SVG rewriting.
//!
//! Documents are handled as a stream of tags and text, which is all that
//! minification and sprite assembly need. Element nesting is never checked.

use crate::transform::css::{self, Item};

/// Attributes whose values are names or references rather than geometry.
const VERBATIM: &[&str] = &["id", "href", "xlink:href", "version"];

#[derive(Debug, Clone, Copy)]
struct Rewrite {
    drop_class: bool,
    round: bool,
}

/// Minifies an SVG document.
///
/// Drops the XML prolog, doctype, comments, `class` attributes and
/// whitespace between tags, and rounds numbers to two decimals. Text content,
/// `<title>` and CDATA sections included, is kept.
///
/// Class styling is moved into `style` attributes first. When a `<style>`
/// sheet holds anything but plain `.name { … }` rules it is left alone, and
/// so are the classes it refers to.
pub fn minify(src: &str) -> String {
    rewrite(
        src,
        Rewrite {
            drop_class: true,
            round: true,
        },
    )
}

/// Like [`strip`], with numbers rounded to two decimals.
pub fn compact(src: &str) -> String {
    rewrite(
        src,
        Rewrite {
            drop_class: false,
            round: true,
        },
    )
}

/// Drops the prolog, doctype, comments and whitespace between tags, leaving
/// everything else untouched.
pub fn strip(src: &str) -> String {
    rewrite(
        src,
        Rewrite {
            drop_class: false,
            round: false,
        },
    )
}

/// Applies `edit` to every start tag of `src`, copying everything else as is.
pub(crate) fn edit_tags(src: &str, mut edit: impl FnMut(&mut Tag)) -> String {
    let mut out = String::with_capacity(src.len());
    for token in tokenize(src) {
        match token {
            Token::Tag(raw) => match Tag::parse(raw) {
                Some(mut tag) => {
                    edit(&mut tag);
                    tag.write(&mut out);
                }
                None => out.push_str(raw),
            },
            Token::Text(raw) | Token::Markup(raw) => out.push_str(raw),
            Token::Cdata(text) => push_cdata(&mut out, text),
        }
    }
    out
}

/// Every start tag of `src`, in document order.
pub(crate) fn start_tags(src: &str) -> impl Iterator<Item = Tag> + '_ {
    tokenize(src).into_iter().filter_map(|token| match token {
        Token::Tag(raw) => Tag::parse(raw),
        _ => None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Text(&'a str),
    /// Contents of a `<![CDATA[ … ]]>` section.
    Cdata(&'a str),
    /// Comment, processing instruction or doctype.
    Markup(&'a str),
    /// Start or end tag.
    Tag(&'a str),
}

fn tokenize(src: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = src;

    while !rest.is_empty() {
        let Some(at) = rest.find('<') else {
            tokens.push(Token::Text(rest));
            break;
        };
        if at > 0 {
            tokens.push(Token::Text(&rest[..at]));
            rest = &rest[at..];
        }

        let (token, len) = if let Some(body) = rest.strip_prefix("<![CDATA[") {
            let end = body.find("]]>").unwrap_or(body.len());
            let len = (end + "<![CDATA[]]>".len()).min(rest.len());
            (Token::Cdata(&body[..end]), len)
        } else if rest.starts_with("<!--") {
            let len = rest[4..].find("-->").map_or(rest.len(), |end| end + 7);
            (Token::Markup(&rest[..len]), len)
        } else if rest.starts_with("<?") {
            let len = rest.find("?>").map_or(rest.len(), |end| end + 2);
            (Token::Markup(&rest[..len]), len)
        } else if rest.starts_with("<!") {
            let len = declaration_end(rest).unwrap_or(rest.len());
            (Token::Markup(&rest[..len]), len)
        } else {
            let len = tag_end(rest).unwrap_or(rest.len());
            (Token::Tag(&rest[..len]), len)
        };

        tokens.push(token);
        rest = &rest[len..];
    }

    tokens
}

fn rewrite(src: &str, opts: Rewrite) -> String {
    let tokens = tokenize(src);
    let rules = if opts.drop_class {
        class_rules(&tokens)
    } else {
        None
    };

    let mut out = String::with_capacity(src.len());
    let mut in_style = false;

    for token in tokens {
        match token {
            Token::Markup(_) => {}
            Token::Text(text) if !in_style => push_text(&mut out, text),
            Token::Cdata(text) if !in_style => push_cdata(&mut out, text),
            Token::Text(_) | Token::Cdata(_) => {}
            Token::Tag(raw) => {
                // Inlined sheets are dropped along with their element.
                if rules.is_some() {
                    if end_name(raw) == Some("style") {
                        in_style = false;
                        continue;
                    }
                    if in_style {
                        continue;
                    }
                }

                let Some(mut tag) = Tag::parse(raw) else {
                    out.push_str(raw);
                    continue;
                };

                if let Some(rules) = &rules {
                    if tag.name == "style" {
                        in_style = !tag.self_closing;
                        continue;
                    }
                    inline_styles(&mut tag, rules);
                    tag.attrs.retain(|(name, _)| name != "class");
                }
                if opts.round {
                    for (name, value) in &mut tag.attrs {
                        if !VERBATIM.contains(&name.as_str()) && !name.starts_with("xmlns") {
                            *value = round_numbers(value);
                        }
                    }
                }
                tag.write(&mut out);
            }
        }
    }

    out
}

/// `(class, declarations)` of every rule in the document's `<style>`
/// elements, or `None` when some rule is not a plain class rule.
fn class_rules(tokens: &[Token<'_>]) -> Option<Vec<(String, String)>> {
    let mut sheet = String::new();
    let mut in_style = false;

    for token in tokens {
        match *token {
            Token::Tag(raw) if end_name(raw) == Some("style") => in_style = false,
            Token::Tag(raw) => {
                if let Some(tag) = Tag::parse(raw) {
                    if tag.name == "style" && !tag.self_closing {
                        in_style = true;
                    }
                }
            }
            Token::Text(text) | Token::Cdata(text) if in_style => sheet.push_str(text),
            _ => {}
        }
    }

    let mut rules = Vec::new();
    for item in css::parse(&sheet) {
        let Item::Rule { prelude, body } = item else {
            return None;
        };
        let declarations = body.trim().trim_end_matches(';').trim();
        for selector in css::split_selectors(prelude) {
            let name = selector.strip_prefix('.')?;
            let plain = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !plain {
                return None;
            }
            rules.push((name.to_string(), declarations.to_string()));
        }
    }

    Some(rules)
}

/// Prepends the declarations of the rules matching the tag's classes to its
/// `style` attribute, in sheet order.
fn inline_styles(tag: &mut Tag, rules: &[(String, String)]) {
    let classes: Vec<String> = tag
        .get("class")
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    let own = tag
        .get("style")
        .map(|own| own.trim().trim_end_matches(';').to_string())
        .unwrap_or_default();

    let mut style: Vec<&str> = rules
        .iter()
        .filter(|(name, body)| classes.contains(name) && !body.is_empty())
        .map(|(_, body)| body.as_str())
        .collect();
    if style.is_empty() {
        return;
    }

    if !own.is_empty() {
        style.push(&own);
    }

    let style = style.join(";");
    tag.set("style", style);
}

/// Name of an end tag like `</style>`.
fn end_name(raw: &str) -> Option<&str> {
    let name = raw.strip_prefix("</")?.strip_suffix('>')?.trim();
    Some(name)
}

fn push_text(out: &mut String, text: &str) {
    if !text.trim().is_empty() {
        out.push_str(text);
    }
}

fn push_cdata(out: &mut String, text: &str) {
    out.push_str("<![CDATA[");
    out.push_str(text);
    out.push_str("]]>");
}

/// Index just past the `>` closing the tag at the start of `s`.
fn tag_end(s: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(i + 1),
            _ => {}
        }
    }
    None
}

/// Like [`tag_end`], skipping over a doctype's `[ … ]` internal subset.
fn declaration_end(s: &str) -> Option<usize> {
    let mut quote = None;
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, '>') if depth == 0 => return Some(i + 1),
            _ => {}
        }
    }
    None
}

/// A start tag with its attributes, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Tag {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub self_closing: bool,
}

impl Tag {
    /// Parses a start tag like `<rect x="1" />`; end tags yield `None`.
    pub fn parse(tag: &str) -> Option<Self> {
        let inner = tag.strip_prefix('<')?.strip_suffix('>')?;
        if inner.starts_with('/') {
            return None;
        }

        let (inner, self_closing) = match inner.trim_end().strip_suffix('/') {
            Some(inner) => (inner, true),
            None => (inner, false),
        };

        let name_end = inner
            .find(|c: char| c.is_whitespace())
            .unwrap_or(inner.len());
        let name = inner[..name_end].to_string();
        if name.is_empty() {
            return None;
        }

        let mut attrs = Vec::new();
        let mut rest = inner[name_end..].trim_start();
        while !rest.is_empty() {
            let key_end = rest
                .find(|c: char| c == '=' || c.is_whitespace())
                .unwrap_or(rest.len());
            let key = rest[..key_end].to_string();
            rest = rest[key_end..].trim_start();

            let Some(after_eq) = rest.strip_prefix('=') else {
                attrs.push((key, String::new()));
                continue;
            };
            let after_eq = after_eq.trim_start();

            let (value, remaining) = match after_eq.chars().next() {
                Some(q @ ('"' | '\'')) => {
                    let body = &after_eq[1..];
                    let end = body.find(q).unwrap_or(body.len());
                    (&body[..end], body.get(end + 1..).unwrap_or(""))
                }
                _ => {
                    let end = after_eq
                        .find(char::is_whitespace)
                        .unwrap_or(after_eq.len());
                    (&after_eq[..end], &after_eq[end..])
                }
            };

            attrs.push((key, value.to_string()));
            rest = remaining.trim_start();
        }

        Some(Self {
            name,
            attrs,
            self_closing,
        })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Replaces the value of `name`, or appends the attribute.
    pub fn set(&mut self, name: &str, value: String) {
        match self.attrs.iter_mut().find(|(key, _)| key == name) {
            Some((_, old)) => *old = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    pub fn write(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attrs {
            let quote = if value.contains('"') { '\'' } else { '"' };
            out.push(' ');
            out.push_str(key);
            out.push('=');
            out.push(quote);
            out.push_str(value);
            out.push(quote);
        }
        if self.self_closing {
            out.push('/');
        }
        out.push('>');
    }
}

/// The root `<svg>` element of a document, split into its start tag and
/// inner markup.
#[derive(Debug, Clone)]
pub(crate) struct Root {
    pub tag: Tag,
    pub inner: String,
}

impl Root {
    pub fn parse(src: &str) -> Option<Self> {
        let src = strip(src);
        let start = src.find("<svg")?;
        let end = start + tag_end(&src[start..])?;
        let tag = Tag::parse(&src[start..end])?;

        let inner = if tag.self_closing {
            String::new()
        } else {
            let close = src.rfind("</svg>").unwrap_or(src.len());
            src.get(end..close).unwrap_or_default().to_string()
        };

        Some(Self { tag, inner })
    }

    /// The `viewBox`, or one spanning `width` × `height` when it is absent.
    pub fn view_box(&self) -> Option<String> {
        if let Some(view_box) = self.tag.get("viewBox") {
            return Some(view_box.to_string());
        }

        let width = dimension(self.tag.get("width")?)?;
        let height = dimension(self.tag.get("height")?)?;
        Some(format!("0 0 {width} {height}"))
    }
}

fn dimension(value: &str) -> Option<f64> {
    value.trim().trim_end_matches("px").parse().ok()
}

/// Rounds every decimal number in `value` to at most two decimals.
fn round_numbers(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = String::with_capacity(value.len());
    let mut i = 0;

    while i < bytes.len() {
        let starts_number = bytes[i].is_ascii_digit()
            || (bytes[i] == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit));
        if !starts_number {
            let c = value[i..].chars().next().unwrap_or_default();
            out.push(c);
            i += c.len_utf8().max(1);
            continue;
        }

        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let mut frac = 0;
        if i < bytes.len() && bytes[i] == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
                frac += 1;
            }
        }
        let exponent = i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E');

        let token = &value[start..i];
        match token.parse::<f64>() {
            Ok(number) if frac > 2 && !exponent => out.push_str(&format_number(number, token)),
            _ => out.push_str(token),
        }
    }

    out
}

fn format_number(number: f64, original: &str) -> String {
    let rounded = format!("{number:.2}");
    let rounded = rounded.trim_end_matches('0').trim_end_matches('.');
    match (original.starts_with('.'), rounded.strip_prefix('0')) {
        (true, Some(rest)) if !rest.is_empty() => rest.to_string(),
        _ => rounded.to_string(),
    }
}

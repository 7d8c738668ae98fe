//! Just enough CSS structure to filter and reorder rules.
//!
//! Stylesheets are split into top-level items without interpreting
//! declarations. Strings, comments and nested braces are respected, so the
//! split is safe on compiled Sass output.

/// A top-level piece of a stylesheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Item<'a> {
    /// `selectors { declarations }`
    Rule { prelude: &'a str, body: &'a str },
    /// `@name params { body }`
    AtBlock { prelude: &'a str, body: &'a str },
    /// `@name params;`
    AtStatement(&'a str),
}

impl Item<'_> {
    pub fn write(&self, out: &mut String) {
        match self {
            Item::Rule { prelude, body } | Item::AtBlock { prelude, body } => {
                out.push_str(prelude);
                out.push('{');
                out.push_str(body);
                out.push('}');
            }
            Item::AtStatement(statement) => {
                out.push_str(statement);
                out.push(';');
            }
        }
    }
}

/// Name of an at-rule prelude, lowercased, without the `@`.
pub(crate) fn at_name(prelude: &str) -> String {
    prelude
        .trim_start_matches('@')
        .split(|c: char| c.is_whitespace() || c == '(' || c == '{')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

pub(crate) fn parse(css: &str) -> Vec<Item<'_>> {
    let bytes = css.as_bytes();
    let mut items = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        i = skip_trivia(bytes, i);
        if i >= bytes.len() {
            break;
        }

        // Stray closing brace, nothing sensible to attach it to.
        if bytes[i] == b'}' {
            i += 1;
            continue;
        }

        let start = i;
        let Some(end) = scan_until(bytes, i, |b| b == b'{' || b == b';') else {
            break;
        };

        let prelude = css[start..end].trim();
        if bytes[end] == b';' {
            if prelude.starts_with('@') {
                items.push(Item::AtStatement(prelude));
            }
            i = end + 1;
            continue;
        }

        let body_start = end + 1;
        let body_end = matching_brace(bytes, body_start).unwrap_or(bytes.len());
        let body = &css[body_start..body_end];

        if prelude.starts_with('@') {
            items.push(Item::AtBlock { prelude, body });
        } else {
            items.push(Item::Rule { prelude, body });
        }

        i = body_end + 1;
    }

    items
}

/// Splits a selector list on top-level commas.
pub(crate) fn split_selectors(prelude: &str) -> Vec<&str> {
    let bytes = prelude.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = skip_string(bytes, i),
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                parts.push(prelude[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }

    parts.push(prelude[start..].trim());
    parts.retain(|part| !part.is_empty());
    parts
}

fn skip_trivia(bytes: &[u8], mut i: usize) -> usize {
    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if bytes[i..].starts_with(b"/*") {
            i = skip_comment(bytes, i);
        } else if bytes[i..].starts_with(b"<!--") {
            i += 4;
        } else if bytes[i..].starts_with(b"-->") {
            i += 3;
        } else {
            return i;
        }
    }
}

/// Index just past the comment starting at `i`.
fn skip_comment(bytes: &[u8], i: usize) -> usize {
    bytes[i + 2..]
        .windows(2)
        .position(|w| w == b"*/")
        .map_or(bytes.len(), |p| i + 2 + p + 2)
}

/// Index of the closing quote of the string starting at `i`.
fn skip_string(bytes: &[u8], i: usize) -> usize {
    let quote = bytes[i];
    let mut j = i + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 1,
            b if b == quote => return j,
            _ => {}
        }
        j += 1;
    }
    bytes.len()
}

/// First top-level byte matching `stop`, outside strings, comments and parens.
fn scan_until(bytes: &[u8], mut i: usize, stop: impl Fn(u8) -> bool) -> Option<usize> {
    let mut parens = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = skip_string(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_comment(bytes, i);
                continue;
            }
            b'(' => parens += 1,
            b')' => parens = parens.saturating_sub(1),
            b if parens == 0 && stop(b) => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Index of the `}` closing a block whose body starts at `i`.
fn matching_brace(bytes: &[u8], mut i: usize) -> Option<usize> {
    let mut depth = 1usize;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = skip_string(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_comment(bytes, i);
                continue;
            }
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

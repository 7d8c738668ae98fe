use std::fmt::Display;
use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use console::Style;
use glob::Pattern;

use crate::error::SourceError;

const ANSI_BLUE: Style = Style::new().blue();
const ANSI_RED: Style = Style::new().red().bold();

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Collects the files under `root` matching `pattern`, sorted.
///
/// A missing root yields an empty set, the same way an empty directory does.
pub fn find(root: &Utf8Path, pattern: &str) -> Result<Vec<Utf8PathBuf>, SourceError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let full = format!("{}/{}", Pattern::escape(root.as_str()), pattern);
    let mut paths = Vec::new();
    for path in glob::glob(&full)? {
        let path = Utf8PathBuf::try_from(path?)?;
        if path.is_file() {
            paths.push(path);
        }
    }

    paths.sort();
    Ok(paths)
}

/// Writes `data` to `path`, creating parent directories first.
pub fn write(path: &Utf8Path, data: impl AsRef<[u8]>) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    fs::write(path, data)
}

/// Copies every file under `src` matching `pattern` into `dst`, keeping the
/// relative layout. Returns the number of files copied.
pub fn copy_files(src: &Utf8Path, pattern: &str, dst: &Utf8Path) -> Result<usize, SourceError> {
    let files = find(src, pattern)?;

    for file in &files {
        let target = rebase(file, src, dst);
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::copy(file, &target)?;
    }

    Ok(files.len())
}

/// Maps `path` from under `from` to the same relative location under `to`.
pub fn rebase(path: &Utf8Path, from: &Utf8Path, to: &Utf8Path) -> Utf8PathBuf {
    match path.strip_prefix(from) {
        Ok(rest) => to.join(rest),
        Err(_) => to.join(path.file_name().unwrap_or(path.as_str())),
    }
}

/// Delete a directory with everything in it, if it exists.
pub fn remove_dir(path: &Utf8Path) -> std::io::Result<()> {
    if fs::metadata(path).is_ok() {
        fs::remove_dir_all(path)?;
    }

    Ok(())
}

/// Prints a notification box on stderr that does not interrupt the run.
pub fn notify(title: &str, message: &str) {
    let width = message
        .lines()
        .map(str::len)
        .chain([title.len()])
        .max()
        .unwrap_or(0);
    let rule = "─".repeat(width + 2);

    eprintln!("┌{rule}┐");
    eprintln!("│ {:<width$} │", ANSI_RED.apply_to(title));
    for line in message.lines() {
        eprintln!("│ {line:<width$} │");
    }
    eprintln!("└{rule}┘");
}

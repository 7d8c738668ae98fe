//! Loading of template data files.
//!
//! Every `.json` and `.js` file in a data directory becomes one entry of a
//! [`Bundle`], keyed by the file name without its extension. The bundle is
//! rebuilt on each render so edits to data files show up on the next run.

use std::collections::HashMap;
use std::fs;
use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value};

use crate::error::ConfigLoadError;

/// Parsed data files keyed by base name.
pub type Bundle = Map<String, Value>;

/// Turns a script data file into a value.
pub trait ModuleEvaluator: Send + Sync {
    fn evaluate(&self, path: &Utf8Path) -> Result<Value, ConfigLoadError>;
}

/// Evaluates `.js` data modules with the `node` binary.
///
/// The module is loaded with `require` and its export is read back as JSON.
#[derive(Debug, Clone)]
pub struct NodeEvaluator {
    program: String,
}

impl Default for NodeEvaluator {
    fn default() -> Self {
        Self {
            program: "node".into(),
        }
    }
}

const NODE_SCRIPT: &str = "process.stdout.write(JSON.stringify(require(process.argv[1])))";

impl ModuleEvaluator for NodeEvaluator {
    fn evaluate(&self, path: &Utf8Path) -> Result<Value, ConfigLoadError> {
        let absolute = path
            .canonicalize_utf8()
            .map_err(|source| ConfigLoadError::Read {
                path: path.to_owned(),
                source,
            })?;

        let output = Command::new(&self.program)
            .arg("-e")
            .arg(NODE_SCRIPT)
            .arg(absolute.as_str())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| ConfigLoadError::Evaluate {
                path: path.to_owned(),
                message: format!("couldn't run {}: {err}", self.program),
            })?;

        if !output.status.success() {
            return Err(ConfigLoadError::Evaluate {
                path: path.to_owned(),
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        // `JSON.stringify(undefined)` prints nothing
        if output.stdout.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&output.stdout).map_err(|source| ConfigLoadError::Json {
            path: path.to_owned(),
            source,
        })
    }
}

/// Reads every `.json`/`.js` file in `dir` into a bundle.
///
/// Files with any other extension are ignored. Two files sharing a base name
/// (`nav.js` and `nav.json`) are rejected instead of silently overwriting
/// each other.
pub fn load_bundle(
    dir: &Utf8Path,
    evaluator: &dyn ModuleEvaluator,
) -> Result<Bundle, ConfigLoadError> {
    let read_err = |source| ConfigLoadError::Read {
        path: dir.to_owned(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        let Ok(path) = Utf8PathBuf::try_from(path) else {
            continue;
        };
        if path.is_file() && matches!(path.extension(), Some("js" | "json")) {
            files.push(path);
        }
    }
    files.sort();

    let mut seen: HashMap<String, Utf8PathBuf> = HashMap::new();
    let mut bundle = Bundle::new();

    for path in files {
        let Some(name) = path.file_stem().map(str::to_owned) else {
            continue;
        };

        if let Some(first) = seen.get(&name) {
            return Err(ConfigLoadError::Collision {
                name,
                first: first.clone(),
                second: path,
            });
        }

        let value = match path.extension() {
            Some("json") => read_json(&path)?,
            _ => evaluator.evaluate(&path)?,
        };

        seen.insert(name.clone(), path);
        bundle.insert(name, value);
    }

    tracing::debug!(dir = %dir, entries = bundle.len(), "loaded data bundle");
    Ok(bundle)
}

fn read_json(path: &Utf8Path) -> Result<Value, ConfigLoadError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
        path: path.to_owned(),
        source,
    })?;

    serde_json::from_str(&text).map_err(|source| ConfigLoadError::Json {
        path: path.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Stands in for node: each module is expected to contain JSON.
    struct JsonModules;

    impl ModuleEvaluator for JsonModules {
        fn evaluate(&self, path: &Utf8Path) -> Result<Value, ConfigLoadError> {
            read_json(path)
        }
    }

    fn tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_json_and_js_entries() {
        let (_guard, dir) = tempdir();
        fs::write(dir.join("site.json"), r#"{"title":"Home"}"#).unwrap();
        fs::write(dir.join("nav.js"), r#"{"items":[1,2]}"#).unwrap();

        let bundle = load_bundle(&dir, &JsonModules).unwrap();

        assert_eq!(
            Value::Object(bundle),
            json!({"site": {"title": "Home"}, "nav": {"items": [1, 2]}})
        );
    }

    #[test]
    fn test_node_evaluates_modules() {
        let node_available = std::process::Command::new("node")
            .arg("--version")
            .output()
            .is_ok_and(|out| out.status.success());
        if !node_available {
            return;
        }

        let (_guard, dir) = tempdir();
        fs::write(dir.join("site.json"), r#"{"title":"Home"}"#).unwrap();
        fs::write(dir.join("nav.js"), "module.exports = { items: [1, 2] };").unwrap();

        let bundle = load_bundle(&dir, &NodeEvaluator::default()).unwrap();

        assert_eq!(
            Value::Object(bundle),
            json!({"site": {"title": "Home"}, "nav": {"items": [1, 2]}})
        );
    }

    #[test]
    fn test_other_extensions_ignored() {
        let (_guard, dir) = tempdir();
        fs::write(dir.join("a.json"), "1").unwrap();
        fs::write(dir.join("b.yaml"), "x: 1").unwrap();
        fs::write(dir.join("c.txt"), "nope").unwrap();
        fs::write(dir.join("d.jsx"), "nope").unwrap();

        let bundle = load_bundle(&dir, &JsonModules).unwrap();

        assert_eq!(bundle.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn test_invalid_json_fails() {
        let (_guard, dir) = tempdir();
        fs::write(dir.join("broken.json"), "{nope").unwrap();

        let err = load_bundle(&dir, &JsonModules).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Json { .. }));
    }

    #[test]
    fn test_collision_is_an_error() {
        let (_guard, dir) = tempdir();
        fs::write(dir.join("nav.json"), "{}").unwrap();
        fs::write(dir.join("nav.js"), "{}").unwrap();

        let err = load_bundle(&dir, &JsonModules).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Collision { name, .. } if name == "nav"));
    }

    #[test]
    fn test_missing_directory() {
        let err = load_bundle(Utf8Path::new("no/such/dir"), &JsonModules).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Read { .. }));
    }

    #[test]
    fn test_multi_dot_name_keeps_inner_dots() {
        let (_guard, dir) = tempdir();
        fs::write(dir.join("site.en.json"), r#""hello""#).unwrap();

        let bundle = load_bundle(&dir, &JsonModules).unwrap();
        assert_eq!(bundle.get("site.en"), Some(&json!("hello")));
    }
}

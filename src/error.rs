use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while assembling the task graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Task '{0}' is defined more than once")]
    Duplicate(String),

    #[error("Task '{0}' is not defined")]
    Undefined(String),

    #[error("Task '{0}' refers to a handle from a different blueprint")]
    ForeignHandle(String),

    #[error("Cycle detected in task graph at '{0}'")]
    Cycle(String),
}

/// Errors surfaced while running tasks.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task '{task}' failed:\n{source:#}")]
    Failed {
        task: String,
        source: anyhow::Error,
    },

    #[error("Task '{task}' panicked: {message}")]
    Panicked { task: String, message: String },

    #[error("Task '{task}': {} of {total} parallel members failed:\n{}", .errors.len(), join(.errors))]
    Parallel {
        task: String,
        total: usize,
        errors: Vec<TaskError>,
    },

    #[error("Task handle #{0} was issued by a different graph")]
    ForeignHandle(usize),
}

fn join(errors: &[TaskError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Errors from collecting a source file set.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Couldn't access files.\n{0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Couldn't read data directory '{path}'.\n{source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON in '{path}'.\n{source}")]
    Json {
        path: Utf8PathBuf,
        source: serde_json::Error,
    },

    #[error("Couldn't evaluate '{path}'.\n{message}")]
    Evaluate { path: Utf8PathBuf, message: String },

    #[error("Data files '{first}' and '{second}' share the name '{name}'")]
    Collision {
        name: String,
        first: Utf8PathBuf,
        second: Utf8PathBuf,
    },
}

#[derive(Debug, Error)]
#[error("Template '{path}': {source:#}")]
pub struct TemplateRenderError {
    pub path: Utf8PathBuf,
    pub source: minijinja::Error,
}

#[derive(Debug, Error)]
pub enum StyleCompileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sass compilation error in '{path}': {source}")]
    Sass {
        path: Utf8PathBuf,
        source: Box<grass::Error>,
    },
}

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("Couldn't start esbuild for '{entry}': {source}")]
    Spawn {
        entry: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Esbuild failed on '{entry}':\n{stderr}")]
    Failed { entry: Utf8PathBuf, stderr: String },
}

#[derive(Debug, Error)]
pub enum ImageProcessError {
    #[error("IO error on '{path}': {source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Image processing error on '{path}': {source}")]
    Image {
        path: Utf8PathBuf,
        source: image::ImageError,
    },
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Couldn't read credentials from '{path}'.\n{source}")]
    CredentialsMissing {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed credentials in '{path}'.\n{source}")]
    CredentialsFormat {
        path: Utf8PathBuf,
        source: serde_json::Error,
    },

    #[error("Couldn't connect to the remote host: {0}")]
    Connect(String),

    #[error("Transfer of '{path}' failed: {message}")]
    Transfer { path: Utf8PathBuf, message: String },

    #[error("{failed} of {total} transfers failed, first error:\n{first}")]
    Partial {
        failed: usize,
        total: usize,
        first: Box<DeployError>,
    },

    #[error(transparent)]
    Source(#[from] SourceError),
}

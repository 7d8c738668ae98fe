//! One-way incremental upload of the output tree.
//!
//! A file is sent when the remote copy is missing or older than the local
//! one. Nothing is ever deleted remotely, and a failed run leaves whatever was
//! already transferred in place.

mod ftp;

use std::collections::HashSet;
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::Deserialize;

use crate::engine::{Context, Task, TaskResult};
use crate::error::DeployError;
use crate::io;

pub use ftp::{FtpConnector, FtpRemote};

/// Remote host access, read from a JSON file.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub host: String,
    pub user: String,
    pub password: String,
    /// Remote directory the output tree is mirrored into.
    #[serde(default)]
    pub folder: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("folder", &self.folder)
            .finish()
    }
}

pub fn load_credentials(path: &Utf8Path) -> Result<Credentials, DeployError> {
    let text = fs::read_to_string(path).map_err(|source| DeployError::CredentialsMissing {
        path: path.to_owned(),
        source,
    })?;

    serde_json::from_str(&text).map_err(|source| DeployError::CredentialsFormat {
        path: path.to_owned(),
        source,
    })
}

/// One open connection to the deployment target.
pub trait Remote {
    /// Modification time of the remote file, `None` when it does not exist.
    fn modified(&mut self, path: &str) -> Result<Option<SystemTime>, DeployError>;

    /// Uploads `local` to `path`, creating missing directories.
    fn upload(&mut self, path: &str, local: &Utf8Path) -> Result<(), DeployError>;
}

/// Opens [`Remote`] connections, one per group of files.
pub trait Connector: Sync {
    type Remote: Remote;

    fn connect(&self) -> Result<Self::Remote, DeployError>;
}

/// Counts of a finished sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub transferred: usize,
    pub skipped: usize,
}

enum Outcome {
    Transferred,
    Skipped,
}

/// Mirrors every file under `dist` to the remote, using up to `parallel`
/// connections at once.
pub fn sync<C: Connector>(
    dist: &Utf8Path,
    connector: &C,
    parallel: usize,
) -> Result<SyncReport, DeployError> {
    let files = io::find(dist, "**/*")?;
    let total = files.len();

    let workers = parallel.max(1);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| DeployError::Connect(format!("couldn't start workers: {e}")))?;

    // One connection per group, so at most `workers` sessions are opened.
    let size = total.div_ceil(workers).max(1);
    let groups: Vec<&[Utf8PathBuf]> = files.chunks(size).collect();

    let results: Vec<Result<Outcome, DeployError>> = pool.install(|| {
        groups
            .par_iter()
            .flat_map_iter(|group| sync_group(connector, dist, group))
            .collect()
    });

    let mut report = SyncReport::default();
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(Outcome::Transferred) => report.transferred += 1,
            Ok(Outcome::Skipped) => report.skipped += 1,
            Err(e) => {
                tracing::error!("{e}");
                errors.push(e);
            }
        }
    }

    let failed = errors.len();
    match errors.into_iter().next() {
        None => Ok(report),
        Some(first) => Err(DeployError::Partial {
            failed,
            total,
            first: Box::new(first),
        }),
    }
}

fn sync_group<C: Connector>(
    connector: &C,
    dist: &Utf8Path,
    group: &[Utf8PathBuf],
) -> Vec<Result<Outcome, DeployError>> {
    match connector.connect() {
        Ok(mut remote) => group
            .iter()
            .map(|file| sync_file(&mut remote, dist, file))
            .collect(),
        Err(e) => group
            .iter()
            .map(|_| Err(DeployError::Connect(e.to_string())))
            .collect(),
    }
}

fn sync_file<R: Remote>(
    remote: &mut R,
    dist: &Utf8Path,
    file: &Utf8Path,
) -> Result<Outcome, DeployError> {
    let path = remote_path(dist, file);
    let local = fs::metadata(file)
        .and_then(|meta| meta.modified())
        .map_err(|e| DeployError::Transfer {
            path: file.to_owned(),
            message: e.to_string(),
        })?;

    let stale = match remote.modified(&path)? {
        Some(remote) => seconds(local) > seconds(remote),
        None => true,
    };

    if !stale {
        return Ok(Outcome::Skipped);
    }

    remote.upload(&path, file)?;
    tracing::info!("uploaded {path}");
    Ok(Outcome::Transferred)
}

/// Path of `file` relative to `dist`, with forward slashes.
fn remote_path(dist: &Utf8Path, file: &Utf8Path) -> String {
    file.strip_prefix(dist)
        .unwrap_or(file)
        .components()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join("/")
}

/// Remote timestamps only carry whole seconds.
fn seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Every directory leading up to `path`, outermost first.
fn parents(path: &str) -> Vec<&str> {
    path.match_indices('/')
        .map(|(at, _)| &path[..at])
        .filter(|dir| !dir.is_empty())
        .collect()
}

/// A local directory standing in for a remote host.
#[derive(Debug, Clone)]
pub struct DirConnector {
    pub root: Utf8PathBuf,
}

impl Connector for DirConnector {
    type Remote = DirRemote;

    fn connect(&self) -> Result<DirRemote, DeployError> {
        fs::create_dir_all(&self.root).map_err(|e| DeployError::Connect(e.to_string()))?;
        Ok(DirRemote {
            root: self.root.clone(),
            created: HashSet::new(),
        })
    }
}

#[derive(Debug)]
pub struct DirRemote {
    root: Utf8PathBuf,
    created: HashSet<String>,
}

impl Remote for DirRemote {
    fn modified(&mut self, path: &str) -> Result<Option<SystemTime>, DeployError> {
        match fs::metadata(self.root.join(path)) {
            Ok(meta) => meta.modified().map(Some).map_err(|e| DeployError::Transfer {
                path: path.into(),
                message: e.to_string(),
            }),
            Err(_) => Ok(None),
        }
    }

    fn upload(&mut self, path: &str, local: &Utf8Path) -> Result<(), DeployError> {
        let transfer = |e: std::io::Error| DeployError::Transfer {
            path: path.into(),
            message: e.to_string(),
        };

        for dir in parents(path) {
            if self.created.insert(dir.to_string()) {
                fs::create_dir_all(self.root.join(dir)).map_err(transfer)?;
            }
        }

        fs::copy(local, self.root.join(path)).map_err(transfer)?;
        Ok(())
    }
}

/// Uploads the output tree over FTP.
#[derive(Debug, Clone)]
pub struct Deploy {
    pub credentials: Utf8PathBuf,
    pub parallel: usize,
}

impl Task for Deploy {
    fn run(&self, ctx: &Context) -> TaskResult {
        let credentials = load_credentials(&self.credentials)?;
        tracing::info!(host = %credentials.host, user = %credentials.user, "deploying");

        let connector = FtpConnector::new(credentials);
        let report = sync(&ctx.layout().dist, &connector, self.parallel)?;

        tracing::info!(
            "deployed: {} transferred, {} up to date",
            report.transferred,
            report.skipped
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    fn dist(root: &Utf8Path) -> Utf8PathBuf {
        let dist = root.join("dist");
        io::write(&dist.join("index.html"), "<h1>hi</h1>").unwrap();
        io::write(&dist.join("css/build.css"), "a{}").unwrap();
        io::write(&dist.join("img/icons/svg/sprite.symbol.svg"), "<svg/>").unwrap();
        dist
    }

    #[test]
    fn test_sync_is_incremental() {
        let (_guard, root) = tempdir();
        let dist = dist(&root);
        let connector = DirConnector {
            root: root.join("remote"),
        };

        let first = sync(&dist, &connector, 2).unwrap();
        assert_eq!(
            first,
            SyncReport {
                transferred: 3,
                skipped: 0
            }
        );
        assert_eq!(
            fs::read_to_string(root.join("remote/css/build.css")).unwrap(),
            "a{}"
        );

        let second = sync(&dist, &connector, 2).unwrap();
        assert_eq!(
            second,
            SyncReport {
                transferred: 0,
                skipped: 3
            }
        );

        let file = fs::File::options()
            .write(true)
            .open(dist.join("index.html"))
            .unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();

        let third = sync(&dist, &connector, 2).unwrap();
        assert_eq!(third.transferred, 1);
        assert_eq!(third.skipped, 2);
    }

    struct Flaky;

    struct FlakyRemote;

    impl Remote for FlakyRemote {
        fn modified(&mut self, _: &str) -> Result<Option<SystemTime>, DeployError> {
            Ok(None)
        }

        fn upload(&mut self, path: &str, _: &Utf8Path) -> Result<(), DeployError> {
            if path.ends_with(".css") {
                return Err(DeployError::Transfer {
                    path: path.into(),
                    message: "550 Permission denied".into(),
                });
            }
            Ok(())
        }
    }

    impl Connector for Flaky {
        type Remote = FlakyRemote;

        fn connect(&self) -> Result<FlakyRemote, DeployError> {
            Ok(FlakyRemote)
        }
    }

    #[test]
    fn test_failed_transfer_reported() {
        let (_guard, root) = tempdir();
        let dist = dist(&root);

        let err = sync(&dist, &Flaky, 4).unwrap_err();

        assert!(matches!(
            err,
            DeployError::Partial {
                failed: 1,
                total: 3,
                ..
            }
        ));
    }

    #[derive(Default)]
    struct Counting {
        opened: std::sync::atomic::AtomicUsize,
    }

    impl Connector for Counting {
        type Remote = FlakyRemote;

        fn connect(&self) -> Result<FlakyRemote, DeployError> {
            self.opened
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(FlakyRemote)
        }
    }

    #[test]
    fn test_connections_bounded_by_parallel() {
        let (_guard, root) = tempdir();
        let dist = root.join("dist");
        for i in 0..40 {
            io::write(&dist.join(format!("page{i}.html")), "<p></p>").unwrap();
        }

        let connector = Counting::default();
        let report = sync(&dist, &connector, 3).unwrap();

        assert_eq!(report.transferred, 40);
        let opened = connector.opened.load(std::sync::atomic::Ordering::SeqCst);
        assert!(opened <= 3, "opened {opened} connections");
        assert!(opened >= 1);
    }

    #[test]
    fn test_credentials() {
        let (_guard, root) = tempdir();
        let path = root.join("ftp.json");

        let missing = load_credentials(&path).unwrap_err();
        assert!(matches!(missing, DeployError::CredentialsMissing { .. }));

        io::write(&path, r#"{"host": "example.com"}"#).unwrap();
        let malformed = load_credentials(&path).unwrap_err();
        assert!(matches!(malformed, DeployError::CredentialsFormat { .. }));

        io::write(
            &path,
            r#"{"host": "example.com", "user": "me", "password": "hunter2"}"#,
        )
        .unwrap();
        let creds = load_credentials(&path).unwrap();
        assert_eq!(creds.folder, "");
        assert!(!format!("{creds:?}").contains("hunter2"));
    }

    #[test]
    fn test_parents() {
        assert_eq!(parents("www/css/a.css"), vec!["www", "www/css"]);
        assert!(parents("a.css").is_empty());
    }
}

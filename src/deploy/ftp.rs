use std::collections::HashSet;
use std::fs::File;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use camino::Utf8Path;
use suppaftp::FtpStream;
use suppaftp::types::FileType;

use super::{Connector, Credentials, Remote, parents};
use crate::error::DeployError;

const DEFAULT_PORT: u16 = 21;

/// Opens authenticated binary-mode FTP sessions.
#[derive(Debug, Clone)]
pub struct FtpConnector {
    credentials: Credentials,
}

impl FtpConnector {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    fn address(&self) -> String {
        let host = &self.credentials.host;
        if host.contains(':') {
            host.clone()
        } else {
            format!("{host}:{DEFAULT_PORT}")
        }
    }
}

impl Connector for FtpConnector {
    type Remote = FtpRemote;

    fn connect(&self) -> Result<FtpRemote, DeployError> {
        let address = self.address();
        let connect = |e: suppaftp::FtpError| DeployError::Connect(format!("{address}: {e}"));

        let mut stream = FtpStream::connect(&address).map_err(connect)?;
        stream
            .login(&self.credentials.user, &self.credentials.password)
            .map_err(connect)?;
        stream.transfer_type(FileType::Binary).map_err(connect)?;

        Ok(FtpRemote {
            stream,
            folder: self.credentials.folder.trim_end_matches('/').to_string(),
            created: HashSet::new(),
        })
    }
}

/// A logged in FTP session rooted at the configured folder.
pub struct FtpRemote {
    stream: FtpStream,
    folder: String,
    created: HashSet<String>,
}

impl FtpRemote {
    fn full(&self, path: &str) -> String {
        if self.folder.is_empty() {
            path.to_string()
        } else {
            format!("{}/{path}", self.folder)
        }
    }
}

impl Remote for FtpRemote {
    fn modified(&mut self, path: &str) -> Result<Option<SystemTime>, DeployError> {
        let full = self.full(path);
        // A missing file answers MDTM with an error, which is all we learn.
        let Ok(time) = self.stream.mdtm(&full) else {
            return Ok(None);
        };

        let secs = u64::try_from(time.and_utc().timestamp()).unwrap_or_default();
        Ok(Some(UNIX_EPOCH + Duration::from_secs(secs)))
    }

    fn upload(&mut self, path: &str, local: &Utf8Path) -> Result<(), DeployError> {
        let full = self.full(path);
        let transfer = |message: String| DeployError::Transfer {
            path: local.to_owned(),
            message,
        };

        for dir in parents(&full) {
            if self.created.insert(dir.to_string()) {
                // Fails when the directory exists already.
                self.stream.mkdir(dir).ok();
            }
        }

        let mut file = File::open(local).map_err(|e| transfer(e.to_string()))?;
        self.stream
            .put_file(&full, &mut file)
            .map_err(|e| transfer(e.to_string()))?;

        Ok(())
    }
}

impl Drop for FtpRemote {
    fn drop(&mut self) {
        self.stream.quit().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector(host: &str) -> FtpConnector {
        FtpConnector::new(Credentials {
            host: host.into(),
            user: "u".into(),
            password: "p".into(),
            folder: "www/".into(),
        })
    }

    #[test]
    fn test_default_port() {
        assert_eq!(connector("example.com").address(), "example.com:21");
        assert_eq!(connector("example.com:2121").address(), "example.com:2121");
    }

    #[test]
    fn test_unreachable_host() {
        let err = connector("127.0.0.1:1").connect().err().unwrap();

        assert!(matches!(err, DeployError::Connect(_)));
    }
}

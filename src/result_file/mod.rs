//! Addressable result files
//!
//! A result lives at `<namespace>/<scope>/<result_id>.data`. Identifiers are
//! validated before any path is built so that no identifier can escape its
//! namespace directory.
//!
//! Results arriving over the network are staged as `<result_id>.partial` and
//! renamed into place once the sender confirms the copy. A failed transfer
//! leaves its staging file for namespace teardown.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::errors::{ExchangeError, ExchangeResult};
use crate::namespace::{ResultNamespace, TransactionScope};

const RESULT_FILE_SUFFIX: &str = ".data";
const STAGING_FILE_SUFFIX: &str = ".partial";

/// Validated result identifier: letters, digits, `_` and `-` only.
///
/// The empty identifier is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResultId(String);

impl ResultId {
    pub fn new(result_id: impl Into<String>) -> ExchangeResult<Self> {
        let result_id = result_id.into();
        if !is_valid_result_id(&result_id) {
            return Err(ExchangeError::invalid_result_id(&result_id));
        }
        Ok(ResultId(result_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name inside a namespace directory
    pub fn file_name(&self) -> String {
        format!("{}{}", self.0, RESULT_FILE_SUFFIX)
    }

    /// Name a transfer writes to before the result is published. Identifiers
    /// cannot contain `.`, so it never collides with a result file.
    pub fn staging_file_name(&self) -> String {
        format!("{}{}", self.0, STAGING_FILE_SUFFIX)
    }
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ResultId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn is_valid_result_id(result_id: &str) -> bool {
    result_id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Path of a result file. Validates the identifier; no I/O.
pub fn path_for(
    namespace: &ResultNamespace,
    scope: &TransactionScope,
    result_id: &str,
) -> ExchangeResult<PathBuf> {
    let result_id = ResultId::new(result_id)?;
    Ok(namespace.resolve(scope).join(result_id.file_name()))
}

/// Size of a result file, `None` if it does not exist
pub fn size_of(
    namespace: &ResultNamespace,
    scope: &TransactionScope,
    result_id: &str,
) -> ExchangeResult<Option<u64>> {
    let path = path_for(namespace, scope, result_id)?;
    file_size(&path)
}

pub(crate) fn file_size(path: &Path) -> ExchangeResult<Option<u64>> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(Some(metadata.len())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ExchangeError::file_io(
            format!("could not stat file \"{}\"", path.display()),
            e,
        )),
    }
}

/// Write handle on a result file.
///
/// Opened with create + truncate; `close()` flushes and releases the
/// descriptor. Dropping without `close()` still releases the descriptor but
/// discards any flush error.
#[derive(Debug)]
pub struct LocalResultFile {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    bytes_written: u64,
    /// Final path of a staged file
    publish_to: Option<PathBuf>,
}

impl LocalResultFile {
    pub fn create(path: impl Into<PathBuf>) -> ExchangeResult<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| {
                ExchangeError::file_io(format!("could not open file \"{}\"", path.display()), e)
            })?;

        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            bytes_written: 0,
            publish_to: None,
        })
    }

    /// Open `<result_id>.partial` in `directory`; `publish()` moves it to
    /// `<result_id>.data`
    pub fn create_staged(directory: &Path, result_id: &ResultId) -> ExchangeResult<Self> {
        let mut file = Self::create(directory.join(result_id.staging_file_name()))?;
        file.publish_to = Some(directory.join(result_id.file_name()));
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> ExchangeResult<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            ExchangeError::invalid_state(format!(
                "result file \"{}\" is already closed",
                self.path.display()
            ))
        })?;

        writer.write_all(bytes).map_err(|e| {
            ExchangeError::file_io(
                format!("could not append to file \"{}\"", self.path.display()),
                e,
            )
        })?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    /// Flush and close. Idempotent; returns the total bytes written.
    pub fn close(&mut self) -> ExchangeResult<u64> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|e| {
                ExchangeError::file_io(
                    format!("could not flush file \"{}\"", self.path.display()),
                    e,
                )
            })?;
        }
        Ok(self.bytes_written)
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    /// Close a staged file and rename it to its result file name.
    ///
    /// A file opened with `create` is only closed.
    pub fn publish(&mut self) -> ExchangeResult<u64> {
        let bytes = self.close()?;
        if let Some(target) = self.publish_to.take() {
            fs::rename(&self.path, &target).map_err(|e| {
                ExchangeError::file_io(
                    format!(
                        "could not publish \"{}\" as \"{}\"",
                        self.path.display(),
                        target.display()
                    ),
                    e,
                )
            })?;
            self.path = target;
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::{BackendId, UserId};
    use tempfile::TempDir;

    fn scope() -> TransactionScope {
        TransactionScope::Local {
            user: UserId(1),
            backend: BackendId(2),
        }
    }

    #[test]
    fn test_identifier_validation() {
        assert!(ResultId::new("").is_ok());
        assert!(ResultId::new("a").is_ok());
        assert!(ResultId::new("x".repeat(255)).is_ok());
        assert!(ResultId::new("repartition_12_from_3_to_1-a").is_ok());

        for bad in ["../etc", "a/b", "a.b", "a b", "naïve", "a\"b"] {
            let err = ResultId::new(bad).unwrap_err();
            assert_eq!(err.code().code(), "AERO_RESULT_ID_INVALID");
            assert!(err.to_string().contains(bad));
        }
    }

    #[test]
    fn test_path_for_layout() {
        let namespace = ResultNamespace::new("/data/result_cache");
        let path = path_for(&namespace, &scope(), "r1").unwrap();
        assert_eq!(path, PathBuf::from("/data/result_cache/1_2/r1.data"));

        let empty = path_for(&namespace, &scope(), "").unwrap();
        assert_eq!(empty, PathBuf::from("/data/result_cache/1_2/.data"));
    }

    #[test]
    fn test_path_for_rejects_before_io() {
        let namespace = ResultNamespace::new("/nonexistent/result_cache");
        assert!(path_for(&namespace, &scope(), "../x").is_err());
        assert!(size_of(&namespace, &scope(), "../x").is_err());
    }

    #[test]
    fn test_size_of_absent_is_none() {
        let dir = TempDir::new().unwrap();
        let namespace = ResultNamespace::new(dir.path());
        assert_eq!(size_of(&namespace, &scope(), "missing").unwrap(), None);
    }

    #[test]
    fn test_local_file_write_and_close() {
        let dir = TempDir::new().unwrap();
        let namespace = ResultNamespace::new(dir.path());
        fs::create_dir_all(namespace.resolve(&scope())).unwrap();
        let path = path_for(&namespace, &scope(), "r1").unwrap();

        let mut file = LocalResultFile::create(&path).unwrap();
        file.write_all(b"1\t2\n").unwrap();
        file.write_all(b"3\t\\N\n").unwrap();
        assert_eq!(file.close().unwrap(), 9);
        assert!(file.is_closed());
        assert!(file.write_all(b"x").is_err());

        assert_eq!(size_of(&namespace, &scope(), "r1").unwrap(), Some(9));
        assert_eq!(fs::read(&path).unwrap(), b"1\t2\n3\t\\N\n");
    }

    #[test]
    fn test_create_truncates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.data");
        fs::write(&path, b"stale contents").unwrap();

        let mut file = LocalResultFile::create(&path).unwrap();
        file.close().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_staged_file_invisible_until_published() {
        let dir = TempDir::new().unwrap();
        let id = ResultId::new("r1").unwrap();

        let mut file = LocalResultFile::create_staged(dir.path(), &id).unwrap();
        file.write_all(b"abc").unwrap();
        file.close().unwrap();
        assert_eq!(file_size(&dir.path().join("r1.data")).unwrap(), None);
        assert_eq!(file_size(&dir.path().join("r1.partial")).unwrap(), Some(3));

        assert_eq!(file.publish().unwrap(), 3);
        assert_eq!(file.path(), dir.path().join("r1.data"));
        assert_eq!(fs::read(dir.path().join("r1.data")).unwrap(), b"abc");
        assert!(!dir.path().join("r1.partial").exists());
    }

    #[test]
    fn test_publish_replaces_previous_result() {
        let dir = TempDir::new().unwrap();
        let id = ResultId::new("r2").unwrap();
        fs::write(dir.path().join("r2.data"), b"old").unwrap();

        let mut file = LocalResultFile::create_staged(dir.path(), &id).unwrap();
        file.write_all(b"newer").unwrap();
        assert_eq!(file.publish().unwrap(), 5);
        assert_eq!(fs::read(dir.path().join("r2.data")).unwrap(), b"newer");
    }
}

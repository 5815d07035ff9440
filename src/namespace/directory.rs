//! On-disk namespace directories and their teardown

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::errors::{ExchangeError, ExchangeResult};
use crate::observability::{log_event, Event};

use super::scope::{BackendId, TransactionScope};

/// Directories created by one backend during the current transaction
#[derive(Debug, Default)]
pub struct NamespaceRegistry {
    created: Vec<PathBuf>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a created directory; returns false if it was already recorded
    pub fn register(&mut self, path: PathBuf) -> bool {
        if self.created.contains(&path) {
            return false;
        }
        self.created.push(path);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
    }

    pub fn len(&self) -> usize {
        self.created.len()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.created
    }

    fn drain(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.created)
    }
}

/// Result of `ResultNamespace::ensure_created`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredNamespace {
    pub path: PathBuf,
    /// This call created the directory (and registered it)
    pub created: bool,
}

/// Counts from a teardown pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownSummary {
    pub removed: usize,
    pub failed: usize,
}

/// Root directory holding one subdirectory per transaction scope
#[derive(Debug, Clone)]
pub struct ResultNamespace {
    root: PathBuf,
}

impl ResultNamespace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a scope. No I/O.
    pub fn resolve(&self, scope: &TransactionScope) -> PathBuf {
        self.root.join(scope.directory_name())
    }

    /// Create the scope directory if absent.
    ///
    /// Concurrent creators race safely: losing the race counts as success, and
    /// only the backend whose `create_dir` succeeded registers the path for
    /// teardown.
    pub fn ensure_created(
        &self,
        scope: &TransactionScope,
        registry: &mut NamespaceRegistry,
    ) -> ExchangeResult<EnsuredNamespace> {
        fs::create_dir_all(&self.root)
            .map_err(|e| ExchangeError::namespace_create_failed(&self.root, e))?;

        let path = self.resolve(scope);
        match fs::create_dir(&path) {
            Ok(()) => {
                let created = registry.register(path.clone());
                if created {
                    let path_str = path.display().to_string();
                    log_event(Event::NamespaceCreated, &[("path", path_str.as_str())]);
                }
                Ok(EnsuredNamespace { path, created })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(EnsuredNamespace {
                path,
                created: false,
            }),
            Err(e) => Err(ExchangeError::namespace_create_failed(&path, e)),
        }
    }

    /// Remove every registered directory. Never fails; always clears the registry.
    ///
    /// Each directory is renamed to `<name>.removed-by-<backend>` before the
    /// recursive delete, freeing the shared name immediately.
    pub fn teardown_all(&self, registry: &mut NamespaceRegistry, backend: BackendId) -> TeardownSummary {
        let mut summary = TeardownSummary::default();

        for path in registry.drain() {
            if remove_namespace_directory(&path, backend) {
                summary.removed += 1;
            } else {
                summary.failed += 1;
            }
        }

        summary
    }
}

fn removal_name(path: &Path, backend: BackendId) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".removed-by-{}", backend));
    path.with_file_name(name)
}

fn remove_namespace_directory(path: &Path, backend: BackendId) -> bool {
    let renamed = removal_name(path, backend);
    let path_str = path.display().to_string();

    let target = match fs::rename(path, &renamed) {
        Ok(()) => renamed,
        Err(e) => {
            let reason = e.to_string();
            log_event(
                Event::NamespaceRenameFailed,
                &[("path", path_str.as_str()), ("reason", reason.as_str())],
            );
            path.to_path_buf()
        }
    };

    match fs::remove_dir_all(&target) {
        Ok(()) => {
            log_event(Event::NamespaceRemoved, &[("path", path_str.as_str())]);
            true
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            let target_str = target.display().to_string();
            let reason = e.to_string();
            log_event(
                Event::NamespaceRemoveFailed,
                &[("path", target_str.as_str()), ("reason", reason.as_str())],
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::scope::UserId;
    use tempfile::TempDir;

    fn local_scope() -> TransactionScope {
        TransactionScope::Local {
            user: UserId(10),
            backend: BackendId(99),
        }
    }

    #[test]
    fn test_resolve_is_pure() {
        let dir = TempDir::new().unwrap();
        let namespace = ResultNamespace::new(dir.path().join("result_cache"));

        let path = namespace.resolve(&local_scope());
        assert_eq!(path, dir.path().join("result_cache").join("10_99"));
        assert!(!namespace.root().exists());
    }

    #[test]
    fn test_ensure_created_registers_once() {
        let dir = TempDir::new().unwrap();
        let namespace = ResultNamespace::new(dir.path().join("result_cache"));
        let mut registry = NamespaceRegistry::new();

        let first = namespace.ensure_created(&local_scope(), &mut registry).unwrap();
        assert!(first.created);
        assert!(first.path.is_dir());

        let second = namespace.ensure_created(&local_scope(), &mut registry).unwrap();
        assert!(!second.created);
        assert_eq!(first.path, second.path);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_existing_directory_is_not_registered() {
        let dir = TempDir::new().unwrap();
        let namespace = ResultNamespace::new(dir.path().join("result_cache"));
        fs::create_dir_all(namespace.resolve(&local_scope())).unwrap();

        let mut registry = NamespaceRegistry::new();
        let ensured = namespace.ensure_created(&local_scope(), &mut registry).unwrap();
        assert!(!ensured.created);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_teardown_removes_and_clears() {
        let dir = TempDir::new().unwrap();
        let namespace = ResultNamespace::new(dir.path().join("result_cache"));
        let mut registry = NamespaceRegistry::new();

        let ensured = namespace.ensure_created(&local_scope(), &mut registry).unwrap();
        fs::write(ensured.path.join("r1.data"), b"payload").unwrap();

        let summary = namespace.teardown_all(&mut registry, BackendId(99));
        assert_eq!(summary, TeardownSummary { removed: 1, failed: 0 });
        assert!(registry.is_empty());
        assert!(!ensured.path.exists());
        assert!(!dir.path().join("result_cache/10_99.removed-by-99").exists());
    }

    #[test]
    fn test_teardown_of_vanished_directory_succeeds() {
        let dir = TempDir::new().unwrap();
        let namespace = ResultNamespace::new(dir.path().join("result_cache"));
        let mut registry = NamespaceRegistry::new();

        let ensured = namespace.ensure_created(&local_scope(), &mut registry).unwrap();
        fs::remove_dir(&ensured.path).unwrap();

        let summary = namespace.teardown_all(&mut registry, BackendId(99));
        assert_eq!(summary.failed, 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_removal_name() {
        let renamed = removal_name(Path::new("/data/result_cache/10_3_42"), BackendId(7));
        assert_eq!(
            renamed,
            PathBuf::from("/data/result_cache/10_3_42.removed-by-7")
        );
    }

    #[test]
    fn test_teardown_falls_back_when_rename_fails() {
        let dir = TempDir::new().unwrap();
        let namespace = ResultNamespace::new(dir.path().join("result_cache"));
        let mut registry = NamespaceRegistry::new();

        let ensured = namespace.ensure_created(&local_scope(), &mut registry).unwrap();
        fs::write(ensured.path.join("r1.data"), b"payload").unwrap();

        // A non-empty directory already holds the removal name
        let blocker = removal_name(&ensured.path, BackendId(99));
        fs::create_dir_all(blocker.join("leftover")).unwrap();

        let summary = namespace.teardown_all(&mut registry, BackendId(99));
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.failed, 0);
        assert!(!ensured.path.exists());
        assert!(registry.is_empty());
        assert!(blocker.join("leftover").is_dir());
    }

    #[test]
    fn test_teardown_counts_failed_removal() {
        let dir = TempDir::new().unwrap();
        let namespace = ResultNamespace::new(dir.path().join("result_cache"));
        fs::create_dir_all(namespace.root()).unwrap();

        // A plain file renames fine but cannot be removed as a directory
        let not_a_directory = namespace.root().join("10_77");
        fs::write(&not_a_directory, b"x").unwrap();
        let mut registry = NamespaceRegistry::new();
        assert!(registry.register(not_a_directory.clone()));

        let summary = namespace.teardown_all(&mut registry, BackendId(77));
        assert_eq!(summary.removed, 0);
        assert_eq!(summary.failed, 1);
        assert!(registry.is_empty());
        assert!(removal_name(&not_a_directory, BackendId(77)).is_file());
    }
}

//! Discovery of module files under the configuration directory.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{ENVIRONMENT_TARGET, EnvironmentError};

/// One readable file found in the module directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEntry {
    path: PathBuf,
    stem: String,
    extension: Option<String>,
}

impl ModuleEntry {
    /// Full path to the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without its extension.
    #[must_use]
    pub fn stem(&self) -> &str {
        &self.stem
    }

    /// Extension without the leading dot, if any.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }
}

/// Readable module files found in one directory.
///
/// Scanning happens once; the catalog does not watch for changes.
#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    root: PathBuf,
    entries: Vec<ModuleEntry>,
}

impl ModuleCatalog {
    /// Scans `root` for readable files.
    ///
    /// A missing directory yields an empty catalog. Unreadable files and
    /// subdirectories are skipped. Entries are ordered by file name.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::Catalog`] when an existing directory cannot
    /// be listed.
    pub fn scan(root: impl Into<PathBuf>) -> Result<Self, EnvironmentError> {
        let dir: PathBuf = root.into();
        let listing = match fs::read_dir(&dir) {
            Ok(listing) => listing,
            Err(error) if matches!(error.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
                debug!(
                    target: ENVIRONMENT_TARGET,
                    path = %dir.display(),
                    "module directory absent"
                );
                return Ok(Self {
                    root: dir,
                    entries: Vec::new(),
                });
            }
            Err(source) => return Err(EnvironmentError::Catalog { path: dir, source }),
        };

        let mut entries: Vec<ModuleEntry> = listing
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && File::open(path).is_ok())
            .filter_map(|path| {
                let stem = path.file_stem()?.to_string_lossy().into_owned();
                let extension = path
                    .extension()
                    .map(|ext| ext.to_string_lossy().into_owned());
                Some(ModuleEntry {
                    path,
                    stem,
                    extension,
                })
            })
            .collect();
        entries.sort_by(|left, right| left.path.cmp(&right.path));

        debug!(
            target: ENVIRONMENT_TARGET,
            path = %dir.display(),
            modules = entries.len(),
            "module directory scanned"
        );
        Ok(Self { root: dir, entries })
    }

    /// Directory that was scanned.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every discovered entry.
    #[must_use]
    pub fn entries(&self) -> &[ModuleEntry] {
        &self.entries
    }

    /// First entry whose stem is `stem`.
    #[must_use]
    pub fn find(&self, stem: &str) -> Option<&ModuleEntry> {
        self.entries.iter().find(|entry| entry.stem == stem)
    }

    /// Entries carrying the given extension.
    #[must_use]
    pub fn with_extension(&self, extension: &str) -> Vec<&ModuleEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.extension() == Some(extension))
            .collect()
    }

    /// Number of discovered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing was discovered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    #[fixture]
    fn module_dir() -> TempDir {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("alerts.clp"), "(defrule a => )").expect("write clp");
        fs::write(dir.path().join("alerts.py"), "def main(): pass").expect("write py");
        fs::write(dir.path().join("README"), "notes").expect("write readme");
        fs::create_dir(dir.path().join("nested")).expect("create subdir");
        dir
    }

    #[rstest]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().expect("temp dir");
        let catalog = ModuleCatalog::scan(dir.path().join("zap_modules")).expect("scan");
        assert!(catalog.is_empty());
    }

    #[rstest]
    fn scan_lists_files_in_name_order(module_dir: TempDir) {
        let catalog = ModuleCatalog::scan(module_dir.path()).expect("scan");
        let names: Vec<_> = catalog
            .entries()
            .iter()
            .map(|entry| (entry.stem(), entry.extension()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("README", None),
                ("alerts", Some("clp")),
                ("alerts", Some("py")),
            ]
        );
    }

    #[rstest]
    fn lookups_group_by_stem_and_extension(module_dir: TempDir) {
        let catalog = ModuleCatalog::scan(module_dir.path()).expect("scan");
        assert_eq!(catalog.with_extension("py").len(), 1);
        let found = catalog.find("alerts").expect("alerts module");
        assert_eq!(found.extension(), Some("clp"));
        assert!(catalog.find("missing").is_none());
    }
}

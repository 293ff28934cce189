//! Report directory management.
//!
//! The reference container writes its reports into a bind-mounted host
//! directory. Once the container has exited, the harness mirrors each role's
//! output into a per-role directory under `target/`. Every copy made here is
//! recorded in a [`ReportTree`] so callers can see what moved and what was
//! skipped.
//!
//! Mirroring is best-effort. A missing source usually means the container
//! never started, and the harness logs that instead of failing the whole
//! run.

use crate::error::{FilesystemError, FsOp};
use crate::role::Role;
use crate::tracing_compat::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Name of the HTML overview the reference tool writes per role.
pub const REPORT_INDEX_HTML: &str = "index.html";

/// Creates `path` (and its parents) if it does not exist.
///
/// Calling this repeatedly on the same path leaves the filesystem unchanged
/// after the first call.
///
/// # Errors
///
/// Returns [`FilesystemError`] if `path` exists but is not a directory, or if
/// it cannot be created.
pub fn ensure_directory(path: &Path) -> Result<(), FilesystemError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => {
            return Err(FilesystemError::new(
                FsOp::CreateDir,
                path,
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "path exists and is not a directory",
                ),
            ));
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(FilesystemError::new(FsOp::Read, path, err)),
    }
    fs::create_dir_all(path).map_err(|err| FilesystemError::new(FsOp::CreateDir, path, err))?;
    debug!(path = %path.display(), "created directory");
    Ok(())
}

/// Totals for one relocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CopyStats {
    /// Regular files copied.
    pub files: u64,
    /// Directories created or merged into.
    pub directories: u64,
    /// Bytes copied.
    pub bytes: u64,
    /// Symlinks and other non-regular entries left out.
    pub skipped: u64,
}

/// Recursively copies the contents of `source` into `destination`.
///
/// `destination` is created if absent. Existing files in `destination` are
/// overwritten, other existing content is kept. Entries are visited in sorted
/// order. Symbolic links inside the tree are never followed or copied.
///
/// # Errors
///
/// Returns [`FilesystemError`] if `source` does not exist, if `destination`
/// lies inside `source`, or if any read or copy fails.
pub fn relocate(source: &Path, destination: &Path) -> Result<CopyStats, FilesystemError> {
    let meta = fs::metadata(source).map_err(|err| FilesystemError::new(FsOp::Read, source, err))?;
    let mut stats = CopyStats::default();

    if !meta.is_dir() {
        ensure_directory(destination)?;
        let name = source.file_name().ok_or_else(|| {
            FilesystemError::new(
                FsOp::Copy,
                source,
                io::Error::new(io::ErrorKind::InvalidInput, "source has no file name"),
            )
        })?;
        stats.bytes = copy_file(source, &destination.join(name))?;
        stats.files = 1;
        return Ok(stats);
    }

    if destination.starts_with(source) {
        return Err(FilesystemError::new(
            FsOp::Copy,
            destination,
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "destination lies inside the source tree",
            ),
        ));
    }

    ensure_directory(destination)?;
    stats.directories = 1;

    let walker = WalkDir::new(source)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry.map_err(|err| walk_error(source, err))?;
        let relative = entry.path().strip_prefix(source).map_err(|_| {
            FilesystemError::new(
                FsOp::Read,
                entry.path(),
                io::Error::new(io::ErrorKind::InvalidData, "entry outside the source tree"),
            )
        })?;
        let target = destination.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            ensure_directory(&target)?;
            stats.directories += 1;
        } else if file_type.is_file() {
            stats.bytes += copy_file(entry.path(), &target)?;
            stats.files += 1;
        } else {
            // Links and special files are not part of a report.
            debug!(path = %entry.path().display(), "skipping non-regular entry");
            stats.skipped += 1;
        }
    }

    Ok(stats)
}

fn walk_error(source: &Path, err: walkdir::Error) -> FilesystemError {
    let path = err.path().unwrap_or(source).to_path_buf();
    FilesystemError::new(FsOp::Read, path, io::Error::from(err))
}

fn copy_file(from: &Path, to: &Path) -> Result<u64, FilesystemError> {
    fs::copy(from, to).map_err(|err| FilesystemError::new(FsOp::Copy, from, err))
}

/// Shell snippet that hands ownership of everything under `container_dir`
/// back to whoever owns `container_dir` itself.
///
/// The container runs as root, so without this the host user could not
/// delete the reports afterwards. It is appended to the container command so
/// it is the last thing the container does before exiting.
#[must_use]
pub fn ownership_fix_command(container_dir: &str) -> String {
    format!("[ -d {container_dir} ] && chown -R `stat -c '%u' {container_dir}` {container_dir}/*")
}

/// Outcome of one recorded relocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RelocationOutcome {
    /// Everything was copied.
    Copied {
        /// Copy totals.
        stats: CopyStats,
    },
    /// The source did not exist; nothing was copied.
    MissingSource,
    /// Copying failed part way.
    Failed {
        /// Error message.
        message: String,
    },
}

/// One `{source, destination}` pair applied after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relocation {
    /// Directory copied from.
    pub source: PathBuf,
    /// Directory copied into.
    pub destination: PathBuf,
    /// What happened.
    pub outcome: RelocationOutcome,
}

/// Ordered record of relocations applied after a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportTree {
    entries: Vec<Relocation>,
}

impl ReportTree {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a relocation.
    pub fn push(&mut self, relocation: Relocation) {
        self.entries.push(relocation);
    }

    /// Relocations in the order they were applied.
    #[must_use]
    pub fn entries(&self) -> &[Relocation] {
        &self.entries
    }

    /// Returns true if every relocation copied its source.
    #[must_use]
    pub fn all_copied(&self) -> bool {
        self.entries
            .iter()
            .all(|entry| matches!(entry.outcome, RelocationOutcome::Copied { .. }))
    }

    /// Returns the number of recorded relocations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The host-side report directory shared with the reference container.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Ensures `root` exists and wraps it.
    ///
    /// # Errors
    ///
    /// Returns [`FilesystemError`] if the directory cannot be created.
    pub fn prepare(root: impl Into<PathBuf>) -> Result<Self, FilesystemError> {
        let root = root.into();
        ensure_directory(&root)?;
        Ok(Self { root })
    }

    /// The report directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Subtree the reference tool writes for `role`.
    #[must_use]
    pub fn role_directory(&self, role: Role) -> PathBuf {
        self.root.join(role.report_subtree())
    }

    /// HTML overview for `role`.
    #[must_use]
    pub fn report_index(&self, role: Role) -> PathBuf {
        self.role_directory(role).join(REPORT_INDEX_HTML)
    }

    /// Returns the role subtree if the reference tool wrote anything there.
    #[must_use]
    pub fn partial_report(&self, role: Role) -> Option<PathBuf> {
        let dir = self.role_directory(role);
        fs::read_dir(&dir)
            .ok()
            .and_then(|mut entries| entries.next())
            .map(|_| dir)
    }

    /// Copies the whole report directory into `destination`, recording the
    /// outcome in `tree`. Failures are logged, never returned.
    pub fn mirror_into(&self, destination: &Path, tree: &mut ReportTree) {
        let outcome = match relocate(&self.root, destination) {
            Ok(stats) => {
                info!(
                    source = %self.root.display(),
                    destination = %destination.display(),
                    files = stats.files,
                    bytes = stats.bytes,
                    "reports relocated"
                );
                RelocationOutcome::Copied { stats }
            }
            Err(err) if err.is_not_found() && err.path == self.root => {
                warn!(
                    source = %self.root.display(),
                    "report directory missing, nothing to relocate"
                );
                RelocationOutcome::MissingSource
            }
            Err(err) => {
                warn!(
                    source = %self.root.display(),
                    destination = %destination.display(),
                    error = %err,
                    "report relocation failed"
                );
                RelocationOutcome::Failed {
                    message: err.to_string(),
                }
            }
        };
        tree.push(Relocation {
            source: self.root.clone(),
            destination: destination.to_path_buf(),
            outcome,
        });
    }
}

//! Deterministic source snapshots.
//!
//! The snapshot is an uncompressed tar with sorted paths and normalized
//! headers (mtime, uid and gid 0; mode 0644 or 0755), so the same tree at
//! the same revision always yields the same `source_sha256`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, Header};
use walkdir::WalkDir;

use super::exclude::{ExcludeError, ExcludeRules, IGNORE_FILE_NAME};
use super::SourceRevision;

pub const SCHEMA_VERSION: u32 = 1;

pub const SCHEMA_ID: &str = "ecr-ci/source_manifest@1";

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("source directory not found: {0}")]
    MissingRoot(PathBuf),

    #[error("symlink escapes source root: {path}")]
    SymlinkEscapesRoot { path: PathBuf },

    #[error("Exclude rules error: {0}")]
    ExcludeError(#[from] ExcludeError),

    #[error("Walk error: {0}")]
    WalkError(#[from] walkdir::Error),

    #[error("path is not within source root: {0}")]
    PathNotInRoot(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Directory,
    Symlink,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Relative path inside the snapshot
    pub path: String,

    /// Size in bytes (0 for directories and symlinks)
    pub size: u64,

    /// SHA-256 of the file contents (empty for directories and symlinks)
    pub sha256: String,

    #[serde(rename = "type")]
    pub entry_type: EntryType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub symlink_target: Option<String>,
}

/// `source_manifest.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceManifest {
    pub schema_version: u32,
    pub schema_id: String,
    pub created_at: DateTime<Utc>,
    pub run_id: String,
    pub revision: SourceRevision,
    /// SHA-256 of the tar bytes
    pub source_sha256: String,
    pub entries: Vec<ManifestEntry>,
}

impl SourceManifest {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn file_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.entry_type == EntryType::File)
            .count()
    }
}

/// Builds snapshots of one checkout.
pub struct Snapshotter {
    root: PathBuf,
    exclude: ExcludeRules,
}

impl Snapshotter {
    /// Snapshot `root` with the default exclusions plus its `.ecrciignore`.
    pub fn new(root: &Path) -> Result<Self, SnapshotError> {
        let root = root
            .canonicalize()
            .map_err(|_| SnapshotError::MissingRoot(root.to_path_buf()))?;
        if !root.is_dir() {
            return Err(SnapshotError::MissingRoot(root));
        }

        let mut exclude = ExcludeRules::new()?;
        let ignore_file = root.join(IGNORE_FILE_NAME);
        if ignore_file.exists() {
            exclude = exclude.with_ignore_file(&ignore_file)?;
        }
        Ok(Self { root, exclude })
    }

    pub fn with_excludes(mut self, patterns: &[&str]) -> Result<Self, SnapshotError> {
        self.exclude = self.exclude.with_patterns(patterns)?;
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collect_entries(&self) -> Result<BTreeMap<PathBuf, EntryType>, SnapshotError> {
        let mut entries = BTreeMap::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
            .into_iter()
            .filter_entry(|e| match e.path().strip_prefix(&self.root) {
                Ok(rel) => rel.as_os_str().is_empty() || !self.exclude.is_excluded(rel),
                Err(_) => false,
            });

        for entry in walker {
            let entry = entry?;
            let path = entry.path();
            let rel_path = path
                .strip_prefix(&self.root)
                .map_err(|_| SnapshotError::PathNotInRoot(path.to_path_buf()))?;
            if rel_path.as_os_str().is_empty() {
                continue;
            }

            let file_type = entry.file_type();
            let entry_type = if file_type.is_symlink() {
                let target = fs::read_link(path)?;
                let resolved = match path.parent() {
                    Some(parent) if target.is_relative() => parent.join(&target),
                    _ => target,
                };
                let canonical = resolved.canonicalize().unwrap_or(resolved);
                if !canonical.starts_with(&self.root) {
                    return Err(SnapshotError::SymlinkEscapesRoot {
                        path: rel_path.to_path_buf(),
                    });
                }
                EntryType::Symlink
            } else if file_type.is_dir() {
                EntryType::Directory
            } else {
                EntryType::File
            };

            entries.insert(rel_path.to_path_buf(), entry_type);
        }

        Ok(entries)
    }

    /// Snapshot the tree for `revision`.
    pub fn create(&self, run_id: &str, revision: &SourceRevision) -> Result<Snapshot, SnapshotError> {
        let entries = self.collect_entries()?;

        let mut tar_bytes = Vec::new();
        let mut manifest_entries = Vec::with_capacity(entries.len());
        {
            let mut builder = Builder::new(&mut tar_bytes);

            for (rel_path, entry_type) in &entries {
                let full_path = self.root.join(rel_path);
                let path_str = rel_path.to_string_lossy().to_string();
                let mut header = normalized_header();

                match entry_type {
                    EntryType::File => {
                        let contents = fs::read(&full_path)?;
                        header.set_path(rel_path)?;
                        header.set_size(contents.len() as u64);
                        header.set_mode(if is_executable(&full_path) { 0o755 } else { 0o644 });
                        header.set_cksum();
                        builder.append(&header, contents.as_slice())?;

                        manifest_entries.push(ManifestEntry {
                            path: path_str,
                            size: contents.len() as u64,
                            sha256: hex::encode(Sha256::digest(&contents)),
                            entry_type: EntryType::File,
                            symlink_target: None,
                        });
                    }
                    EntryType::Directory => {
                        header.set_path(format!("{}/", path_str))?;
                        header.set_size(0);
                        header.set_mode(0o755);
                        header.set_entry_type(tar::EntryType::Directory);
                        header.set_cksum();
                        builder.append(&header, io::empty())?;

                        manifest_entries.push(ManifestEntry {
                            path: path_str,
                            size: 0,
                            sha256: String::new(),
                            entry_type: EntryType::Directory,
                            symlink_target: None,
                        });
                    }
                    EntryType::Symlink => {
                        let target = fs::read_link(&full_path)?;
                        header.set_path(rel_path)?;
                        header.set_size(0);
                        header.set_mode(0o777);
                        header.set_entry_type(tar::EntryType::Symlink);
                        header.set_link_name(&target)?;
                        header.set_cksum();
                        builder.append(&header, io::empty())?;

                        manifest_entries.push(ManifestEntry {
                            path: path_str,
                            size: 0,
                            sha256: String::new(),
                            entry_type: EntryType::Symlink,
                            symlink_target: Some(target.to_string_lossy().to_string()),
                        });
                    }
                }
            }

            builder.finish()?;
        }

        let source_sha256 = hex::encode(Sha256::digest(&tar_bytes));
        tracing::debug!(
            entries = manifest_entries.len(),
            bytes = tar_bytes.len(),
            sha256 = %source_sha256,
            "source snapshot created"
        );

        Ok(Snapshot {
            manifest: SourceManifest {
                schema_version: SCHEMA_VERSION,
                schema_id: SCHEMA_ID.to_string(),
                created_at: Utc::now(),
                run_id: run_id.to_string(),
                revision: revision.clone(),
                source_sha256,
                entries: manifest_entries,
            },
            tar_bytes,
        })
    }
}

fn normalized_header() -> Header {
    let mut header = Header::new_gnu();
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = fs::metadata(path) {
            return metadata.permissions().mode() & 0o111 != 0;
        }
    }
    false
}

/// A finished snapshot: the tar bytes plus their manifest.
#[derive(Debug)]
pub struct Snapshot {
    pub tar_bytes: Vec<u8>,
    pub manifest: SourceManifest,
}

impl Snapshot {
    pub fn source_sha256(&self) -> &str {
        &self.manifest.source_sha256
    }

    pub fn size(&self) -> u64 {
        self.tar_bytes.len() as u64
    }

    /// Write `source.tar` and `source_manifest.json` into `dir`.
    pub fn write_to(&self, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join("source.tar"), &self.tar_bytes)?;
        let json = self
            .manifest
            .to_json()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(dir.join("source_manifest.json"), json)
    }

    /// Unpack into `dest`, the build's source directory.
    pub fn extract_to(&self, dest: &Path) -> io::Result<()> {
        fs::create_dir_all(dest)?;
        Archive::new(self.tar_bytes.as_slice()).unpack(dest)
    }
}

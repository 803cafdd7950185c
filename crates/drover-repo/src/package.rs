//! Package builder: working copy → deliverable archive.
//!
//! A package is a gzip-compressed tar archive of payload files at their
//! repository-relative paths, plus one provenance manifest entry
//! ([`MANIFEST_NAME`]) recording the resolved commit, the build timestamp,
//! and the requested config path. The manifest is a hard guarantee, not
//! best-effort.
//!
//! Because the manifest embeds a timestamp, repeated builds of the same
//! commit are not byte-identical; only the payload entries are stable.
//! Consumers correlate builds by commit hash, not by archive digest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};

use drover_core::model::validate_config_path;

use crate::cache::RepoGuard;
use crate::error::PackagingError;
use crate::git::GitCli;

/// Fixed name of the provenance manifest entry.
pub const MANIFEST_NAME: &str = "_drover_meta.txt";

/// Extension marking a config file as an executable configuration script.
const SCRIPT_EXTENSION: &str = "ps1";

/// Conventionally named support directories pulled in next to a script
/// config: shared libraries, baseline definitions, common modules.
const SUPPORT_DIRS: [&str; 4] = ["baselines", "common", "modules", "lib"];

/// Hex length of the exposed content digest.
const DIGEST_LEN: usize = 16;

/// Inclusion mode for a package build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageMode {
    /// Every tracked file under the working copy root (minus VCS metadata).
    Full,
    /// The config path plus its conventional support set.
    Selective,
}

/// Package builder configuration.
#[derive(Debug, Clone)]
pub struct PackageConfig {
    /// Root directory holding one working copy per repository id.
    ///
    /// Must match the repository cache's root.
    pub repos_root: PathBuf,
    /// Upper bound on cumulative payload bytes; builds beyond it are
    /// rejected instead of buffered.
    pub max_payload_bytes: u64,
}

impl PackageConfig {
    /// Default payload cap: 256 MiB.
    pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 256 * 1024 * 1024;
}

/// A built package.
#[derive(Debug, Clone)]
pub struct Package {
    /// The complete tar.gz byte stream.
    pub bytes: Vec<u8>,
    /// Commit the working copy was at when packaged.
    pub commit: String,
    /// SHA-256 of `bytes`, hex, truncated to 16 chars. Correlation token
    /// only; safe to expose in a response header.
    pub digest: String,
}

/// Builds delivery archives from synchronized working copies.
#[derive(Debug)]
pub struct PackageBuilder {
    config: PackageConfig,
    git: GitCli,
}

impl PackageBuilder {
    /// Creates a builder over the configured repository root.
    #[must_use]
    pub fn new(config: PackageConfig, git: GitCli) -> Self {
        Self { config, git }
    }

    /// Builds a package for the working copy the guard serializes.
    ///
    /// Taking the [`RepoGuard`] keeps the build inside the same critical
    /// section as the preceding sync, so the tree cannot change underneath
    /// the walk.
    ///
    /// # Errors
    ///
    /// Returns a [`PackagingError`] if the working copy is absent, the
    /// config path is invalid or unresolvable, the payload exceeds the
    /// size bound, or archive writing fails.
    pub async fn build(
        &self,
        guard: &RepoGuard,
        config_path: &str,
        mode: PackageMode,
    ) -> Result<Package, PackagingError> {
        validate_config_path(config_path).map_err(|e| PackagingError::InvalidPath {
            reason: e.to_string(),
        })?;

        let repo_id = guard.repo_id();
        let repo_path = self.config.repos_root.join(repo_id.to_string());
        if !repo_path.join(".git").is_dir() {
            return Err(PackagingError::NotSynchronized { repo_id });
        }

        let commit = self.git.rev_parse_head(&repo_path).await?;

        let entries = match mode {
            PackageMode::Full => collect_tree(&repo_path, &repo_path)?,
            PackageMode::Selective => collect_selective(&repo_path, config_path)?,
        };

        let payload_bytes: u64 = entries
            .values()
            .map(|p| std::fs::metadata(p).map(|m| m.len()).unwrap_or(0))
            .sum();
        if payload_bytes > self.config.max_payload_bytes {
            return Err(PackagingError::TooLarge {
                size: payload_bytes,
                limit: self.config.max_payload_bytes,
            });
        }

        let bytes = write_archive(&entries, &commit, config_path)?;

        let digest = {
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            hex::encode(hasher.finalize())[..DIGEST_LEN].to_string()
        };

        tracing::info!(
            %repo_id,
            commit = %&commit[..commit.len().min(8)],
            files = entries.len(),
            size = bytes.len(),
            digest = %digest,
            "package built"
        );

        Ok(Package {
            bytes,
            commit,
            digest,
        })
    }
}

/// Collects every file under `dir` (recursively) keyed by its
/// repository-relative archive name, skipping VCS metadata.
fn collect_tree(
    dir: &Path,
    repo_root: &Path,
) -> Result<BTreeMap<String, PathBuf>, PackagingError> {
    let mut entries = BTreeMap::new();
    add_tree(&mut entries, dir, repo_root)?;
    Ok(entries)
}

fn add_tree(
    entries: &mut BTreeMap<String, PathBuf>,
    dir: &Path,
    repo_root: &Path,
) -> Result<(), PackagingError> {
    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
    {
        let entry = entry.map_err(|e| {
            PackagingError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "walk failed")
            }))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(name) = arcname(entry.path(), repo_root) {
            entries.insert(name, entry.path().to_path_buf());
        }
    }
    Ok(())
}

/// Resolves the selective inclusion set for `config_path`.
///
/// Single file: the file itself, and when it is a configuration script,
/// the conventional support directories plus sibling scripts.
/// Directory: its recursive contents plus the support directories.
fn collect_selective(
    repo_root: &Path,
    config_path: &str,
) -> Result<BTreeMap<String, PathBuf>, PackagingError> {
    let target = repo_root.join(config_path);
    if !target.exists() {
        return Err(PackagingError::MissingPath {
            path: config_path.to_string(),
        });
    }

    let mut entries = BTreeMap::new();

    if target.is_file() {
        if let Some(name) = arcname(&target, repo_root) {
            entries.insert(name, target.clone());
        }
        let is_script = target
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(SCRIPT_EXTENSION));
        if is_script {
            add_support_set(&mut entries, repo_root, &target)?;
        }
    } else {
        add_tree(&mut entries, &target, repo_root)?;
        add_support_set(&mut entries, repo_root, &target)?;
    }

    Ok(entries)
}

fn add_support_set(
    entries: &mut BTreeMap<String, PathBuf>,
    repo_root: &Path,
    target: &Path,
) -> Result<(), PackagingError> {
    for dirname in SUPPORT_DIRS {
        let dir = repo_root.join(dirname);
        if dir.is_dir() {
            add_tree(entries, &dir, repo_root)?;
        }
    }

    // Scripts colocated with the target, de-duplicated by archive name.
    let siblings = if target.is_file() {
        target.parent().map(Path::to_path_buf)
    } else {
        Some(target.to_path_buf())
    };
    if let Some(dir) = siblings {
        if dir.is_dir() {
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                let is_script = path.is_file()
                    && path
                        .extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case(SCRIPT_EXTENSION));
                if is_script {
                    if let Some(name) = arcname(&path, repo_root) {
                        entries.entry(name).or_insert(path);
                    }
                }
            }
        }
    }

    Ok(())
}

fn arcname(path: &Path, repo_root: &Path) -> Option<String> {
    let rel = path.strip_prefix(repo_root).ok()?;
    // Archive names are forward-slash joined regardless of host separator.
    let name = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if name.is_empty() { None } else { Some(name) }
}

fn write_archive(
    entries: &BTreeMap<String, PathBuf>,
    commit: &str,
    config_path: &str,
) -> Result<Vec<u8>, PackagingError> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (name, path) in entries {
        builder.append_path_with_name(path, name)?;
    }

    let packaged_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let manifest = format!(
        "commit={commit}\npackaged_at={packaged_at}\nconfig_path={config_path}\n"
    );
    let mut header = tar::Header::new_gnu();
    header.set_size(manifest.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, MANIFEST_NAME, manifest.as_bytes())?;

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(root: &Path, files: &[(&str, &str)]) {
        for (rel, contents) in files {
            let path = root.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }
    }

    #[test]
    fn selective_file_set_includes_script_and_support_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fixture(
            dir.path(),
            &[
                ("nodes/a.ps1", "configuration A {}"),
                ("nodes/b.ps1", "configuration B {}"),
                ("nodes/readme.md", "notes"),
                ("baselines/base.ps1", "baseline"),
                ("common/helpers.psm1", "module"),
                ("unrelated/x.txt", "no"),
            ],
        );

        let entries = collect_selective(dir.path(), "nodes/a.ps1").unwrap();
        let names: Vec<&str> = entries.keys().map(String::as_str).collect();
        assert!(names.contains(&"nodes/a.ps1"));
        // Sibling scripts come along, other sibling files do not.
        assert!(names.contains(&"nodes/b.ps1"));
        assert!(!names.contains(&"nodes/readme.md"));
        // Support directories are included wholesale.
        assert!(names.contains(&"baselines/base.ps1"));
        assert!(names.contains(&"common/helpers.psm1"));
        assert!(!names.contains(&"unrelated/x.txt"));
    }

    #[test]
    fn selective_plain_file_skips_support_set() {
        let dir = tempfile::tempdir().unwrap();
        fixture(
            dir.path(),
            &[("configs/app.yaml", "a: 1"), ("baselines/base.ps1", "x")],
        );

        let entries = collect_selective(dir.path(), "configs/app.yaml").unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("configs/app.yaml"));
    }

    #[test]
    fn selective_directory_recurses_and_adds_support() {
        let dir = tempfile::tempdir().unwrap();
        fixture(
            dir.path(),
            &[
                ("mof/server01/localhost.mof", "mof"),
                ("mof/server01/meta.mof", "meta"),
                ("baselines/base.ps1", "x"),
            ],
        );

        let entries = collect_selective(dir.path(), "mof").unwrap();
        assert!(entries.contains_key("mof/server01/localhost.mof"));
        assert!(entries.contains_key("mof/server01/meta.mof"));
        assert!(entries.contains_key("baselines/base.ps1"));
    }

    #[test]
    fn selective_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path(), &[("nodes/a.ps1", "x")]);

        let err = collect_selective(dir.path(), "nodes/missing.ps1").unwrap_err();
        assert!(matches!(err, PackagingError::MissingPath { .. }));
    }

    #[test]
    fn full_tree_skips_vcs_metadata() {
        let dir = tempfile::tempdir().unwrap();
        fixture(
            dir.path(),
            &[
                ("nodes/a.ps1", "x"),
                (".git/HEAD", "ref: refs/heads/main"),
                (".git/objects/aa/bb", "blob"),
            ],
        );

        let entries = collect_tree(dir.path(), dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("nodes/a.ps1"));
    }

    #[test]
    fn archive_carries_exactly_one_manifest() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path(), &[("nodes/a.ps1", "configuration A {}")]);
        let entries = collect_tree(dir.path(), dir.path()).unwrap();

        let bytes = write_archive(&entries, "abc123", "nodes/a.ps1").unwrap();

        let decoder = flate2::read::GzDecoder::new(bytes.as_slice());
        let mut archive = tar::Archive::new(decoder);
        let mut manifests = 0;
        let mut body = String::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.path().unwrap().to_string_lossy() == MANIFEST_NAME {
                manifests += 1;
                use std::io::Read;
                entry.read_to_string(&mut body).unwrap();
            }
        }
        assert_eq!(manifests, 1);
        assert!(body.contains("commit=abc123"));
        assert!(body.contains("packaged_at="));
        assert!(body.contains("config_path=nodes/a.ps1"));
    }

    #[test]
    fn arcname_uses_forward_slashes() {
        let root = Path::new("/repo");
        let name = arcname(Path::new("/repo/nodes/a.ps1"), root).unwrap();
        assert_eq!(name, "nodes/a.ps1");
        assert!(arcname(root, root).is_none());
    }
}

//! The shared temporary-file area.
//!
//! All transient artifacts live directly under one root and follow a fixed
//! generated-name grammar (`vlm-<unix millis>-<8 hex>[.ext]`). Cleanup
//! validates a candidate path structurally against that grammar and the
//! root before deleting anything: a caller handing us an arbitrary path
//! must not be able to delete files this subsystem never created.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Prefix of every generated name.
const NAME_PREFIX: &str = "vlm-";

/// The directory all jobs allocate their temporary files in.
///
/// Names combine a timestamp with a random salt so two jobs for different
/// sources never clash, even when started in the same millisecond.
#[derive(Debug, Clone)]
pub struct TempArea {
    root: PathBuf,
}

impl TempArea {
    /// Open (and create if needed) the temp area at `root`.
    pub fn new(root: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&root)?;
        // resolve symlinks once so containment checks compare real paths
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generate_name(&self, ext: Option<&str>) -> String {
        let millis = chrono::Utc::now().timestamp_millis();
        let salt: u32 = rand::random();
        match ext {
            Some(ext) => format!("{NAME_PREFIX}{millis}-{salt:08x}.{ext}"),
            None => format!("{NAME_PREFIX}{millis}-{salt:08x}"),
        }
    }

    /// Reserve a fresh artifact path (the file itself is not created).
    pub fn artifact_path(&self, ext: &str) -> PathBuf {
        self.root.join(self.generate_name(Some(ext)))
    }

    /// Create a fresh working directory for one job.
    pub fn create_job_dir(&self) -> std::io::Result<PathBuf> {
        let dir = self.root.join(self.generate_name(None));
        std::fs::create_dir(&dir)?;
        Ok(dir)
    }

    /// Best-effort delete of a path previously returned by this subsystem.
    ///
    /// Refuses (with an error) anything outside the temp root or not named
    /// by the generated-name grammar. A path that passes validation but no
    /// longer exists is a silent no-op, and deletion failures are logged
    /// rather than surfaced.
    pub fn cleanup(&self, path: &Path) -> Result<()> {
        if !path.is_absolute() {
            bail!("refusing to clean up relative path {}", path.display());
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("path {} has no usable file name", path.display()))?;
        if !is_generated_name(name) {
            bail!(
                "refusing to clean up {}: not a generated temp name",
                path.display()
            );
        }
        // containment is a path relation, not a substring check; the parent
        // must resolve to exactly the temp root
        let parent = path
            .parent()
            .with_context(|| format!("path {} has no parent", path.display()))?;
        let parent = match parent.canonicalize() {
            Ok(p) => p,
            // parent gone means the artifact is gone too
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).context("failed to resolve cleanup path"),
        };
        if parent != self.root {
            bail!(
                "refusing to clean up {}: outside the temp root",
                path.display()
            );
        }

        let target = parent.join(name);
        let result = match std::fs::symlink_metadata(&target) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => Err(e),
            Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(&target),
            Ok(_) => std::fs::remove_file(&target),
        };
        if let Err(e) = result {
            tracing::warn!(path = %target.display(), error = %e, "temp cleanup failed");
        }
        Ok(())
    }
}

/// Validate a file name against the generated-name grammar:
/// `vlm-<decimal millis>-<8 lowercase hex>[.<alnum ext>]`.
pub fn is_generated_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix(NAME_PREFIX) else {
        return false;
    };
    let Some((millis, rest)) = rest.split_once('-') else {
        return false;
    };
    if millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let (salt, ext) = match rest.split_once('.') {
        Some((salt, ext)) => (salt, Some(ext)),
        None => (rest, None),
    };
    if salt.len() != 8
        || !salt
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return false;
    }
    match ext {
        None => true,
        Some(ext) => !ext.is_empty() && ext.bytes().all(|b| b.is_ascii_alphanumeric()),
    }
}

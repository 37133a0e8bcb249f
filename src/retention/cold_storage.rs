//! Cold storage offload (spec §4.10 "Cold storage"). Local tar.gz is
//! fully implemented; S3/GCS are out of scope for the core engine (spec
//! Non-goals: "no bundled cloud SDKs") and are represented only as the
//! trait contract an adapter would implement.

use std::fs;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::info;

use crate::canonical::sha256_hex;
use crate::errors::IoError;

/// A place a run's artifact directory can be archived to once it's no
/// longer kept full locally. `offload` must be idempotent: offloading an
/// already-archived run returns the same manifest reference.
pub trait ColdStorageProvider: Send + Sync {
    /// Archive `run_dir` (named `run_hash`) and return an opaque
    /// reference (e.g. a local path or an object key) recorded in the
    /// cold-storage manifest.
    fn offload(&self, run_dir: &Path, run_hash: &str) -> Result<String, IoError>;

    /// True if a prior `offload` call already produced a valid archive
    /// for this run, i.e. it can be skipped.
    fn exists(&self, run_hash: &str) -> bool;
}

/// Writes `<prefix>/<run_hash>.tar.gz` under a local directory. This is
/// the only provider wired all the way through; `S3`/`Gcs` in
/// [`crate::config::ColdStorageProviderKind`] select it as a fallback
/// until an adapter supplies a real implementation of the trait above.
pub struct LocalColdStorage {
    root: PathBuf,
}

impl LocalColdStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn archive_path(&self, run_hash: &str) -> PathBuf {
        self.root.join(format!("{run_hash}.tar.gz"))
    }
}

impl ColdStorageProvider for LocalColdStorage {
    fn offload(&self, run_dir: &Path, run_hash: &str) -> Result<String, IoError> {
        fs::create_dir_all(&self.root)?;
        let dest = self.archive_path(run_hash);
        let tmp = dest.with_extension("tar.gz.tmp");
        {
            let file = fs::File::create(&tmp)?;
            let encoder = GzEncoder::new(file, Compression::default());
            let mut builder = tar::Builder::new(encoder);
            builder
                .append_dir_all(".", run_dir)
                .map_err(|e| IoError { message: e.to_string() })?;
            builder.into_inner().map_err(|e| IoError { message: e.to_string() })?.finish()?;
        }
        fs::rename(&tmp, &dest)?;
        let bytes = fs::read(&dest)?;
        let digest = sha256_hex(&bytes);
        info!(run_hash = %run_hash, archive = %dest.display(), sha256 = %digest, "cold storage archive written");
        Ok(dest.to_string_lossy().to_string())
    }

    fn exists(&self, run_hash: &str) -> bool {
        self.archive_path(run_hash).is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_offload_writes_a_tar_gz_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let run_dir = tmp.path().join("run");
        fs::create_dir_all(&run_dir).unwrap();
        fs::write(run_dir.join("manifest.json"), b"{}").unwrap();

        let cold_root = tmp.path().join("cold");
        let provider = LocalColdStorage::new(&cold_root);
        assert!(!provider.exists("h0"));
        let reference = provider.offload(&run_dir, "h0").unwrap();
        assert!(Path::new(&reference).is_file());
        assert!(provider.exists("h0"));
    }
}

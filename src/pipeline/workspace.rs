use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::JobId;
use crate::JobError;

/// Per-job scratch directory under the download root.
///
/// The directory is released exactly once, either through [`JobWorkspace::finish`]
/// or on drop. With cleanup disabled it is left on disk for inspection.
#[derive(Debug)]
pub struct JobWorkspace {
    dir: Option<TempDir>,
    path: PathBuf,
    cleanup: bool,
}

impl JobWorkspace {
    pub fn create(root: &Path, job: &JobId, cleanup: bool) -> Result<Self, JobError> {
        fs_err::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("job-{}-{}-", job.requester, job.seq))
            .tempdir_in(root)?;
        let path = dir.path().to_path_buf();
        tracing::debug!(path = %path.display(), "Created job workspace");

        Ok(Self {
            dir: Some(dir),
            path,
            cleanup,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete an artifact that has been superseded or rejected
    pub fn discard(&self, artifact: &Path) {
        match fs_err::remove_file(artifact) {
            Ok(()) => tracing::debug!(path = %artifact.display(), "Removed artifact"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => tracing::warn!(%error, "Failed to remove artifact"),
        }
    }

    /// Release the workspace. Later calls do nothing.
    pub fn finish(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        if !self.cleanup {
            let kept = dir.into_path();
            tracing::info!(path = %kept.display(), "Cleanup disabled; keeping job files");
            return;
        }

        match dir.close() {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed job workspace"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            // Cleanup problems never change the job's outcome
            Err(error) => tracing::warn!(%error, path = %self.path.display(), "Failed to remove job workspace"),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.dir.is_none()
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB: JobId = JobId { requester: 7, seq: 1 };

    #[test]
    fn finish_removes_everything_when_cleanup_is_on() {
        let root = tempfile::tempdir().unwrap();
        let mut workspace = JobWorkspace::create(root.path(), &JOB, true).unwrap();
        let path = workspace.path().to_path_buf();
        fs_err::write(path.join("video.mp4"), b"data").unwrap();

        workspace.finish();
        assert!(workspace.is_finished());
        assert!(!path.exists());

        // second release is a no-op
        workspace.finish();
        assert_eq!(fs_err::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn files_are_kept_when_cleanup_is_off() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let workspace = JobWorkspace::create(root.path(), &JOB, false).unwrap();
            fs_err::write(workspace.path().join("song.m4a"), b"data").unwrap();
            workspace.path().to_path_buf()
        };
        assert!(path.join("song.m4a").exists());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("job-7-1-"));
    }

    #[test]
    fn drop_releases_the_workspace() {
        let root = tempfile::tempdir().unwrap();
        let path = JobWorkspace::create(root.path(), &JOB, true).unwrap().path().to_path_buf();
        assert!(!path.exists());
    }

    #[test]
    fn discard_tolerates_missing_files() {
        let root = tempfile::tempdir().unwrap();
        let workspace = JobWorkspace::create(root.path(), &JOB, true).unwrap();
        let artifact = workspace.path().join("big.mp4");
        fs_err::write(&artifact, b"data").unwrap();

        workspace.discard(&artifact);
        assert!(!artifact.exists());
        workspace.discard(&artifact);
    }

    #[test]
    fn concurrent_jobs_get_distinct_directories() {
        let root = tempfile::tempdir().unwrap();
        let first = JobWorkspace::create(root.path(), &JOB, true).unwrap();
        let second = JobWorkspace::create(root.path(), &JOB, true).unwrap();
        assert_ne!(first.path(), second.path());
    }
}

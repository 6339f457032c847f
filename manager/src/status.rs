use std::sync::{Arc, RwLock};

use bundlekit_types::{ManagerPhase, ManagerStatus};

/// Concurrency-safe wrapper around the manager status record. Writers are
/// the phase runner and init; the only reader is the HTTP status handler.
#[derive(Clone, Default)]
pub struct StatusService {
    inner: Arc<RwLock<ManagerStatus>>,
}

impl StatusService {
    pub fn new() -> Self {
        StatusService::default()
    }

    pub fn set_phase(&self, phase: ManagerPhase) {
        let mut status = self.inner.write().unwrap();
        status.phase = Some(phase);
    }

    pub fn set_error(&self, message: &str) {
        let mut status = self.inner.write().unwrap();
        status.error = true;
        status.error_message = message.to_owned();
    }

    pub fn set_progress(&self, progress: i32) {
        let mut status = self.inner.write().unwrap();
        status.progress = progress;
    }

    pub fn set_fileinfo(&self, filename: &str, filesize: i64) {
        let mut status = self.inner.write().unwrap();
        status.filename = filename.to_owned();
        status.filesize = filesize;
    }

    /// Returns a snapshot of the current record.
    pub fn get(&self) -> ManagerStatus {
        self.inner.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_visible_to_snapshots() {
        let status = StatusService::new();
        status.set_phase(ManagerPhase::ClusterBundle);
        status.set_progress(40);
        status.set_fileinfo("bundle.zip", 123);

        let snapshot = status.get();
        assert_eq!(snapshot.phase, Some(ManagerPhase::ClusterBundle));
        assert_eq!(snapshot.progress, 40);
        assert_eq!(snapshot.filename, "bundle.zip");
        assert_eq!(snapshot.filesize, 123);
        assert!(!snapshot.error);

        status.set_error("boom");
        let snapshot = status.get();
        assert!(snapshot.error);
        assert_eq!(snapshot.error_message, "boom");
    }
}

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

/// Storage behind the opaque attachment references kept on a task.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Frees the storage behind `references` and returns how many entries
    /// were removed. Failures are logged per entry and never bubble up.
    async fn release(&self, references: &[String]) -> usize;
}

#[derive(Debug, Clone)]
pub struct DirAttachmentStore {
    dir: PathBuf,
}

impl DirAttachmentStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("attachments"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let candidate = Path::new(reference);
        let mut components = candidate.components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => Some(self.dir.join(name)),
            _ => None,
        }
    }
}

#[async_trait]
impl AttachmentStore for DirAttachmentStore {
    #[tracing::instrument(skip(self, references), fields(count = references.len()))]
    async fn release(&self, references: &[String]) -> usize {
        let mut removed = 0;
        for reference in references {
            let Some(path) = self.resolve(reference) else {
                warn!(reference = %reference, "attachment reference is not a plain file name; skipping");
                continue;
            };

            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(file = %path.display(), "released attachment");
                    removed += 1;
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!(file = %path.display(), "attachment already gone");
                }
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "failed to release attachment");
                }
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{AttachmentStore, DirAttachmentStore};

    #[tokio::test]
    async fn releases_only_plain_names_inside_the_directory() {
        let temp = tempdir().expect("tempdir");
        let store = DirAttachmentStore::new(temp.path());
        std::fs::create_dir_all(store.dir()).expect("mkdir");
        std::fs::write(store.dir().join("scan.pdf"), b"pdf").expect("write");
        std::fs::write(temp.path().join("outside.txt"), b"keep").expect("write");

        let removed = store
            .release(&[
                "scan.pdf".to_string(),
                "missing.png".to_string(),
                "../outside.txt".to_string(),
            ])
            .await;

        assert_eq!(removed, 1);
        assert!(!store.dir().join("scan.pdf").exists());
        assert!(temp.path().join("outside.txt").exists());
    }
}

use crate::error::Result;
use crate::paths;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use uuid::Uuid;

/// Admission queue between request handlers and the queue monitor.
pub trait QueueStore: Send + Sync {
    /// Admits a build. An existing entry for the same id is left alone.
    fn enqueue(&self, id: Uuid) -> Result<()>;

    /// The oldest waiting build, if any.
    fn next(&self) -> Result<Option<Uuid>>;

    /// Moves a waiting build to the running slot. Returns `false` when the
    /// entry vanished first (a concurrent cancel).
    fn promote(&self, id: Uuid) -> Result<bool>;

    /// Drops a build from the running slot once it is terminal.
    fn demote(&self, id: Uuid) -> Result<()>;

    fn remove_new(&self, id: Uuid) -> Result<bool>;

    fn remove_run(&self, id: Uuid) -> Result<bool>;

    /// Waiting builds in dispatch order.
    fn waiting(&self) -> Result<Vec<Uuid>>;

    fn running(&self) -> Result<Vec<Uuid>>;

    /// Removes entries that no longer point at a build. Returns how many.
    fn prune_dangling(&self) -> Result<usize>;
}

/// `queue/new` and `queue/run` directories of symlinks into `results/`.
#[derive(Debug, Clone)]
pub struct SymlinkQueue {
    new_dir: PathBuf,
    run_dir: PathBuf,
    results_dir: PathBuf,
}

impl SymlinkQueue {
    pub fn new(lib_dir: &Path) -> Self {
        Self {
            new_dir: paths::new_queue_dir(lib_dir),
            run_dir: paths::run_queue_dir(lib_dir),
            results_dir: paths::results_dir(lib_dir),
        }
    }

    fn entries(dir: &Path) -> Result<Vec<(Uuid, PathBuf)>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            match name.to_str().and_then(|n| n.parse::<Uuid>().ok()) {
                Some(id) => entries.push((id, entry.path())),
                None => tracing::warn!("Ignoring unexpected queue entry {}", entry.path().display()),
            }
        }
        Ok(entries)
    }

    /// Waiting entries with the mtime of the build directory they point at.
    fn waiting_by_age(&self) -> Result<Vec<(SystemTime, Uuid)>> {
        let mut aged = Vec::new();
        for (id, link) in Self::entries(&self.new_dir)? {
            // fs::metadata follows the link, so this is the target's mtime.
            match fs::metadata(&link).and_then(|meta| meta.modified()) {
                Ok(modified) => aged.push((modified, id)),
                Err(err) => tracing::debug!("Skipping queue entry {}: {}", link.display(), err),
            }
        }
        aged.sort();
        Ok(aged)
    }

    fn remove_link(link: &Path) -> Result<bool> {
        match fs::remove_file(link) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

impl QueueStore for SymlinkQueue {
    fn enqueue(&self, id: Uuid) -> Result<()> {
        let link = self.new_dir.join(id.to_string());
        if link.symlink_metadata().is_ok() {
            tracing::warn!("Build {} is already in the new queue", id);
            return Ok(());
        }
        std::os::unix::fs::symlink(self.results_dir.join(id.to_string()), &link)?;
        Ok(())
    }

    fn next(&self) -> Result<Option<Uuid>> {
        Ok(self.waiting_by_age()?.first().map(|(_, id)| *id))
    }

    fn promote(&self, id: Uuid) -> Result<bool> {
        let name = id.to_string();
        let link = self.new_dir.join(&name);
        match fs::rename(&link, self.run_dir.join(&name)) {
            Ok(()) => Ok(true),
            // Only a vanished source link is a race; a missing run/ is not.
            Err(err) if err.kind() == ErrorKind::NotFound && link.symlink_metadata().is_err() => {
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn demote(&self, id: Uuid) -> Result<()> {
        Self::remove_link(&self.run_dir.join(id.to_string()))?;
        Ok(())
    }

    fn remove_new(&self, id: Uuid) -> Result<bool> {
        Self::remove_link(&self.new_dir.join(id.to_string()))
    }

    fn remove_run(&self, id: Uuid) -> Result<bool> {
        Self::remove_link(&self.run_dir.join(id.to_string()))
    }

    fn waiting(&self) -> Result<Vec<Uuid>> {
        Ok(self.waiting_by_age()?.into_iter().map(|(_, id)| id).collect())
    }

    fn running(&self) -> Result<Vec<Uuid>> {
        let mut ids: Vec<Uuid> = Self::entries(&self.run_dir)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn prune_dangling(&self) -> Result<usize> {
        let mut removed = 0;
        for dir in [&self.new_dir, &self.run_dir] {
            for entry in fs::read_dir(dir)? {
                let link = entry?.path();
                // is_dir follows the link; a dangling one reports false.
                if !link.is_dir() {
                    tracing::info!("Removing broken symlink {}", link.display());
                    if Self::remove_link(&link)? {
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::set_mtime;
    use std::time::Duration;

    fn setup() -> (tempfile::TempDir, SymlinkQueue) {
        let dir = tempfile::tempdir().unwrap();
        paths::make_queue_dirs(dir.path()).unwrap();
        let queue = SymlinkQueue::new(dir.path());
        (dir, queue)
    }

    fn result_dir(lib: &Path, id: Uuid) -> PathBuf {
        let path = paths::results_dir(lib).join(id.to_string());
        fs::create_dir_all(&path).unwrap();
        path
    }

    #[test]
    fn next_follows_target_mtime_not_enqueue_order() {
        let (dir, queue) = setup();
        let older = Uuid::new_v4();
        let newer = Uuid::new_v4();
        let base = SystemTime::now() - Duration::from_secs(3600);

        set_mtime(&result_dir(dir.path(), newer), base + Duration::from_secs(60));
        set_mtime(&result_dir(dir.path(), older), base);

        queue.enqueue(newer).unwrap();
        queue.enqueue(older).unwrap();

        assert_eq!(queue.next().unwrap(), Some(older));
        assert_eq!(queue.waiting().unwrap(), vec![older, newer]);
    }

    #[test]
    fn empty_queue_has_no_next() {
        let (_dir, queue) = setup();
        assert_eq!(queue.next().unwrap(), None);
        assert!(queue.running().unwrap().is_empty());
    }

    #[test]
    fn promote_moves_link_and_tolerates_races() {
        let (dir, queue) = setup();
        let id = Uuid::new_v4();
        result_dir(dir.path(), id);
        queue.enqueue(id).unwrap();

        assert!(queue.promote(id).unwrap());
        assert!(queue.waiting().unwrap().is_empty());
        assert_eq!(queue.running().unwrap(), vec![id]);

        assert!(!queue.promote(id).unwrap());

        queue.demote(id).unwrap();
        queue.demote(id).unwrap();
        assert!(queue.running().unwrap().is_empty());
    }

    #[test]
    fn promote_fails_when_run_dir_is_missing() {
        let (dir, queue) = setup();
        let id = Uuid::new_v4();
        result_dir(dir.path(), id);
        queue.enqueue(id).unwrap();
        fs::remove_dir(paths::run_queue_dir(dir.path())).unwrap();

        assert!(queue.promote(id).is_err());
        assert_eq!(queue.waiting().unwrap(), vec![id]);
    }

    #[test]
    fn enqueue_twice_keeps_one_entry() {
        let (dir, queue) = setup();
        let id = Uuid::new_v4();
        result_dir(dir.path(), id);
        queue.enqueue(id).unwrap();
        queue.enqueue(id).unwrap();
        assert_eq!(queue.waiting().unwrap(), vec![id]);
        assert!(queue.remove_new(id).unwrap());
        assert!(!queue.remove_new(id).unwrap());
    }

    #[test]
    fn prune_removes_only_dangling_links() {
        let (dir, queue) = setup();
        let live = Uuid::new_v4();
        result_dir(dir.path(), live);
        queue.enqueue(live).unwrap();
        queue.enqueue(Uuid::new_v4()).unwrap();

        let ghost_run = Uuid::new_v4();
        std::os::unix::fs::symlink(
            dir.path().join("nowhere"),
            paths::run_queue_dir(dir.path()).join(ghost_run.to_string()),
        )
        .unwrap();

        assert_eq!(queue.prune_dangling().unwrap(), 2);
        assert_eq!(queue.waiting().unwrap(), vec![live]);
        assert!(queue.running().unwrap().is_empty());
        assert_eq!(queue.prune_dangling().unwrap(), 0);
    }
}

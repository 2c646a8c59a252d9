//! Work-queue lookup: `.conductor/queues/<queue>/<item>.json`.

use std::path::PathBuf;

use anyhow::Result;

use super::records::RecordDir;
use crate::core::types::WorkItem;

/// Read-only view of the queue remote workers claim items from.
pub trait WorkQueue {
    /// `None` when the queue no longer holds the item.
    fn get_item(&self, queue_name: &str, item_id: &str) -> Result<Option<WorkItem>>;
}

#[derive(Debug, Clone)]
pub struct FileWorkQueue {
    root: PathBuf,
}

impl FileWorkQueue {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn queue(&self, queue_name: &str) -> RecordDir {
        RecordDir::new(self.root.join(queue_name))
    }

    /// Enqueue or overwrite an item. Producers live outside this crate.
    pub fn put_item(&self, queue_name: &str, item: &WorkItem) -> Result<()> {
        let queue = self.queue(queue_name);
        let _lock = queue.lock()?;
        queue.write(&item.id, item)
    }
}

impl WorkQueue for FileWorkQueue {
    fn get_item(&self, queue_name: &str, item_id: &str) -> Result<Option<WorkItem>> {
        self.queue(queue_name).load(item_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::WorkItemStatus;

    #[test]
    fn items_are_looked_up_per_queue() {
        let temp = tempfile::tempdir().expect("tempdir");
        let queue = FileWorkQueue::new(temp.path());
        let item = WorkItem {
            id: "w1".to_string(),
            status: WorkItemStatus::Completed,
            result: Some("done".to_string()),
            error: None,
        };
        queue.put_item("goal-1", &item).expect("put");

        assert_eq!(queue.get_item("goal-1", "w1").expect("get"), Some(item));
        assert_eq!(queue.get_item("goal-2", "w1").expect("other queue"), None);
        assert_eq!(queue.get_item("goal-1", "w2").expect("missing"), None);
    }
}

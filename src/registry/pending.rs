use parking_lot::Mutex;

use crate::core::Dependency;
use crate::mapping::ResultShape;
use crate::parser::markup::Element;

/// Outcome of one resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Done,
    Blocked(Dependency),
}

/// Work items waiting for a dependency, each queue behind its own lock.
#[derive(Debug)]
pub struct PendingQueue<T> {
    items: Mutex<Vec<T>>,
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }
}

impl<T> PendingQueue<T> {
    pub fn push(&self, item: T) {
        self.items.lock().push(item);
    }

    /// Removes every queued item for a retry round.
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock())
    }

    /// Puts still-blocked items back, ahead of anything queued meanwhile.
    pub fn restore(&self, mut blocked: Vec<T>) {
        let mut items = self.items.lock();
        blocked.append(&mut items);
        *items = blocked;
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

/// A parsed result shape not yet registered.
#[derive(Debug, Clone)]
pub struct PendingShape {
    pub resource: String,
    pub shape: ResultShape,
    /// Fully qualified parent id.
    pub extends: Option<String>,
}

/// `<cache-ref>` of `namespace` pointing at `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCacheRef {
    pub namespace: String,
    pub target: String,
}

/// A statement element to be (re)built.
#[derive(Debug, Clone)]
pub struct PendingStatement {
    pub resource: String,
    pub namespace: String,
    pub element: Element,
    pub required_database_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_and_restore_keep_order() {
        let queue = PendingQueue::default();
        queue.push(1);
        queue.push(2);
        let taken = queue.take();
        assert!(queue.is_empty());

        queue.push(3);
        queue.restore(taken);
        assert_eq!(queue.take(), vec![1, 2, 3]);
    }
}

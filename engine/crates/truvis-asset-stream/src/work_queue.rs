use crate::work_item::WorkItem;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// 所有 worker 共享的 FIFO 队列
///
/// 只有加锁期间会阻塞，`try_pop` 永远不会等待。
#[derive(Default)]
pub struct WorkQueue {
    items: Mutex<VecDeque<WorkItem>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: WorkItem) {
        self.items.lock().push_back(item);
    }

    /// 放回队首，用于分配失败后的重新排队
    pub fn push_front(&self, item: WorkItem) {
        self.items.lock().push_front(item);
    }

    pub fn try_pop(&self) -> Option<WorkItem> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// 取出全部剩余的 item
    pub fn drain(&self) -> Vec<WorkItem> {
        self.items.lock().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Asset;
    use crate::handle::AssetKind;
    use crate::loader::LoaderHandle;
    use crate::test_utils::StubLoader;
    use std::sync::Arc;
    use std::thread;

    fn item(name: &str, loader: &LoaderHandle) -> WorkItem {
        WorkItem::from_memory(vec![0u8], AssetKind::Blob, loader.clone(), Asset::new_handle(name, AssetKind::Blob))
    }

    #[test]
    fn test_fifo_order() {
        let loader: LoaderHandle = Arc::new(StubLoader::new());
        let queue = WorkQueue::new();
        assert!(queue.try_pop().is_none());

        queue.push(item("a", &loader));
        queue.push(item("b", &loader));
        queue.push(item("c", &loader));
        assert_eq!(queue.len(), 3);

        let names: Vec<_> = std::iter::from_fn(|| queue.try_pop()).map(|i| i.asset().name().to_string()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_front_jumps_the_queue() {
        let loader: LoaderHandle = Arc::new(StubLoader::new());
        let queue = WorkQueue::new();
        queue.push(item("a", &loader));
        queue.push(item("b", &loader));

        let first = queue.try_pop().unwrap();
        queue.push_front(first);
        assert_eq!(queue.try_pop().unwrap().asset().name(), "a");
    }

    #[test]
    fn test_concurrent_push_keeps_every_item() {
        let loader: LoaderHandle = Arc::new(StubLoader::new());
        let queue = Arc::new(WorkQueue::new());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let queue = queue.clone();
                let loader = loader.clone();
                thread::spawn(move || {
                    for i in 0..25 {
                        queue.push(item(&format!("{t}-{i}"), &loader));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.drain().len(), 100);
        assert!(queue.is_empty());
    }
}

//! 有界优先级任务队列
//!
//! 只保存处于 Queued 状态的任务ID。排序规则：优先级高的在前，同优先级按提交时间先后。
//! 重试或节点失联后重新入队的任务沿用原提交时间，因此不会排到同级新任务之后。

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use recon_core::{SchedulerError, SchedulerResult, Task, TaskPriority};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Reverse<TaskPriority>,
    created_at: DateTime<Utc>,
    seq: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: BTreeMap<QueueKey, String>,
    index: HashMap<String, QueueKey>,
    /// 已预留但尚未提交的槽位
    reserved: usize,
    next_seq: u64,
}

impl QueueState {
    fn occupied(&self) -> usize {
        self.entries.len() + self.reserved
    }

    fn insert(&mut self, task: &Task) {
        if self.index.contains_key(&task.id) {
            return;
        }
        let key = QueueKey {
            priority: Reverse(task.priority),
            created_at: task.created_at,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(key, task.id.clone());
        self.index.insert(task.id.clone(), key);
    }
}

#[derive(Debug)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    capacity: usize,
}

/// 队列槽位预留
///
/// 调用 [`QueueSlot::commit`] 后任务进入队列；未提交就被丢弃时槽位自动释放，
/// 持久化失败的提交不会占用队列容量。
#[must_use = "未提交的槽位会在丢弃时释放"]
pub struct QueueSlot<'a> {
    queue: &'a TaskQueue,
    committed: bool,
}

impl QueueSlot<'_> {
    pub fn commit(mut self, task: &Task) {
        let mut state = self.queue.state();
        state.reserved -= 1;
        state.insert(task);
        self.committed = true;
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.queue.state().reserved -= 1;
        }
    }
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity,
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 预留一个槽位，队列已满时返回 `CapacityExceeded` 且不做任何修改
    pub fn try_reserve(&self) -> SchedulerResult<QueueSlot<'_>> {
        let mut state = self.state();
        if state.occupied() >= self.capacity {
            return Err(SchedulerError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        state.reserved += 1;
        Ok(QueueSlot {
            queue: self,
            committed: false,
        })
    }

    /// 直接入队，任务已在队列中时不重复插入
    pub fn push(&self, task: &Task) -> SchedulerResult<()> {
        if self.contains(&task.id) {
            return Ok(());
        }
        self.try_reserve()?.commit(task);
        Ok(())
    }

    /// 按出队顺序查看队首的最多 `limit` 个任务，不移除
    pub fn peek(&self, limit: usize) -> Vec<String> {
        self.state()
            .entries
            .values()
            .take(limit)
            .cloned()
            .collect()
    }

    /// 取出队首任务
    pub fn pop(&self) -> Option<String> {
        let mut state = self.state();
        let (_, task_id) = state.entries.pop_first()?;
        state.index.remove(&task_id);
        Some(task_id)
    }

    pub fn remove(&self, task_id: &str) -> bool {
        let mut state = self.state();
        match state.index.remove(task_id) {
            Some(key) => {
                state.entries.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.state().index.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 剩余可预留的槽位数
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.state().occupied())
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use recon_testing_utils::{test_epoch, TaskBuilder};

    fn task(priority: TaskPriority, offset_secs: i64) -> Task {
        TaskBuilder::new()
            .with_priority(priority)
            .with_created_at(test_epoch() + Duration::seconds(offset_secs))
            .build()
    }

    #[test]
    fn test_priority_then_fifo_order() {
        let queue = TaskQueue::new(10);
        let low = task(TaskPriority::Low, 0);
        let normal_old = task(TaskPriority::Normal, 1);
        let normal_new = task(TaskPriority::Normal, 2);
        let critical = task(TaskPriority::Critical, 3);

        for t in [&normal_new, &low, &critical, &normal_old] {
            queue.push(t).unwrap();
        }

        assert_eq!(
            queue.peek(10),
            vec![
                critical.id.clone(),
                normal_old.id.clone(),
                normal_new.id.clone(),
                low.id.clone()
            ]
        );
        assert_eq!(queue.pop(), Some(critical.id));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_requeued_task_keeps_submission_order() {
        let queue = TaskQueue::new(10);
        let older = task(TaskPriority::High, 0);
        let newer = task(TaskPriority::High, 10);

        queue.push(&newer).unwrap();
        // 重新入队的旧任务排在同级新任务之前
        queue.push(&older).unwrap();
        assert_eq!(queue.pop(), Some(older.id));
    }

    #[test]
    fn test_capacity_exceeded_without_mutation() {
        let queue = TaskQueue::new(2);
        let a = task(TaskPriority::Normal, 0);
        let b = task(TaskPriority::Normal, 1);
        let c = task(TaskPriority::Critical, 2);
        queue.push(&a).unwrap();
        queue.push(&b).unwrap();

        let err = queue.push(&c).unwrap_err();
        assert!(matches!(err, SchedulerError::CapacityExceeded { capacity: 2 }));
        assert_eq!(queue.len(), 2);
        assert!(!queue.contains(&c.id));
        assert_eq!(queue.peek(10), vec![a.id, b.id]);
    }

    #[test]
    fn test_reserved_slots_count_against_capacity() {
        let queue = TaskQueue::new(1);
        let slot = queue.try_reserve().unwrap();
        assert_eq!(queue.available(), 0);
        assert!(queue.try_reserve().is_err());

        drop(slot);
        assert_eq!(queue.available(), 1);
        assert!(queue.is_empty());

        let t = task(TaskPriority::Normal, 0);
        queue.try_reserve().unwrap().commit(&t);
        assert!(queue.contains(&t.id));
        assert_eq!(queue.available(), 0);
    }

    #[test]
    fn test_push_is_idempotent_and_remove() {
        let queue = TaskQueue::new(1);
        let t = task(TaskPriority::Normal, 0);
        queue.push(&t).unwrap();
        queue.push(&t).unwrap();
        assert_eq!(queue.len(), 1);

        assert!(queue.remove(&t.id));
        assert!(!queue.remove(&t.id));
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);
    }
}

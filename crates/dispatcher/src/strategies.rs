use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use recon_core::{Node, Task};
use tracing::debug;

/// 节点选择策略
///
/// `candidates` 只包含在线且有空闲槽位的节点。
pub trait TaskDispatchStrategy: Send + Sync {
    fn select_node<'a>(&self, task: &Task, candidates: &'a [Node]) -> Option<&'a Node>;

    fn name(&self) -> &str;
}

/// 最小负载策略
///
/// 负载率最低者优先；负载相同时选最近一次心跳更新的节点，再按ID保证确定性。
#[derive(Debug, Default)]
pub struct LeastLoadedStrategy;

impl LeastLoadedStrategy {
    pub fn new() -> Self {
        Self
    }

    fn compare(a: &Node, b: &Node) -> CmpOrdering {
        a.load_ratio()
            .partial_cmp(&b.load_ratio())
            .unwrap_or(CmpOrdering::Equal)
            .then_with(|| b.last_heartbeat_at.cmp(&a.last_heartbeat_at))
            .then_with(|| a.id.cmp(&b.id))
    }
}

impl TaskDispatchStrategy for LeastLoadedStrategy {
    fn select_node<'a>(&self, task: &Task, candidates: &'a [Node]) -> Option<&'a Node> {
        if candidates.is_empty() {
            debug!("没有可用的节点处理任务 {}", task.id);
            return None;
        }

        let selected = candidates.iter().min_by(|a, b| Self::compare(a, b))?;

        debug!(
            "负载均衡策略选择节点: {} (负载: {:.1}%)",
            selected.id,
            selected.load_ratio() * 100.0
        );
        Some(selected)
    }

    fn name(&self) -> &str {
        "LeastLoaded"
    }
}

pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskDispatchStrategy for RoundRobinStrategy {
    fn select_node<'a>(&self, task: &Task, candidates: &'a [Node]) -> Option<&'a Node> {
        if candidates.is_empty() {
            debug!("没有可用的节点处理任务 {}", task.id);
            return None;
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        let selected = &candidates[index];

        debug!(
            "轮询策略选择节点: {} (索引: {}/{})",
            selected.id,
            index,
            candidates.len()
        );
        Some(selected)
    }

    fn name(&self) -> &str {
        "RoundRobin"
    }
}

/// 根据配置名称创建策略，未知名称回退到最小负载
pub fn strategy_from_name(name: &str) -> Arc<dyn TaskDispatchStrategy> {
    match name {
        "round_robin" => Arc::new(RoundRobinStrategy::new()),
        _ => Arc::new(LeastLoadedStrategy::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use recon_testing_utils::{test_epoch, NodeBuilder, TaskBuilder};

    #[test]
    fn test_least_loaded_picks_lowest_ratio() {
        let task = TaskBuilder::new().build();
        let nodes = vec![
            NodeBuilder::new("a").with_id("a").with_capacity(4).with_active_tasks(2).build(),
            NodeBuilder::new("b").with_id("b").with_capacity(10).with_active_tasks(3).build(),
            NodeBuilder::new("c").with_id("c").with_capacity(2).with_active_tasks(1).build(),
        ];

        let selected = LeastLoadedStrategy::new().select_node(&task, &nodes).unwrap();
        assert_eq!(selected.id, "b");
    }

    #[test]
    fn test_least_loaded_tie_breaks_on_recent_heartbeat_then_id() {
        let task = TaskBuilder::new().build();
        let base = test_epoch();
        let nodes = vec![
            NodeBuilder::new("a").with_id("a").with_last_heartbeat(base).build(),
            NodeBuilder::new("b")
                .with_id("b")
                .with_last_heartbeat(base + Duration::seconds(5))
                .build(),
            NodeBuilder::new("c")
                .with_id("c")
                .with_last_heartbeat(base + Duration::seconds(5))
                .build(),
        ];

        let selected = LeastLoadedStrategy::new().select_node(&task, &nodes).unwrap();
        assert_eq!(selected.id, "b");
    }

    #[test]
    fn test_round_robin_cycles() {
        let task = TaskBuilder::new().build();
        let nodes = vec![
            NodeBuilder::new("a").with_id("a").build(),
            NodeBuilder::new("b").with_id("b").build(),
        ];
        let strategy = RoundRobinStrategy::new();

        let picks: Vec<String> = (0..4)
            .map(|_| strategy.select_node(&task, &nodes).unwrap().id.clone())
            .collect();
        assert_eq!(picks, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn test_empty_candidates() {
        let task = TaskBuilder::new().build();
        assert!(LeastLoadedStrategy::new().select_node(&task, &[]).is_none());
        assert!(RoundRobinStrategy::new().select_node(&task, &[]).is_none());
    }

    #[test]
    fn test_strategy_from_name() {
        assert_eq!(strategy_from_name("round_robin").name(), "RoundRobin");
        assert_eq!(strategy_from_name("least_loaded").name(), "LeastLoaded");
    }
}

//! # 数据模型
//!
//! 调度核心的两类记录：扫描任务 [`Task`] 和执行节点 [`Node`]。
//! 两者都以 JSON 文档形式按 ID 持久化，状态字段使用枚举避免无效值。
//!
//! ## 任务状态流转
//! ```text
//! Pending → Queued → Assigned → Running → Completed / Failed
//!             ↑                    │
//!             └────── Retrying ←───┘
//! ```
//!
//! ## 节点状态流转
//! ```text
//! Registering → Online → Suspect → Offline → Removed
//!                  ↑________|__________|   (收到新心跳)
//! ```

pub mod node;
pub mod task;

pub use node::*;
pub use task::*;

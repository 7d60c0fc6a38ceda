use ahash::RandomState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::common::traits::TimeoutHandler;

/// 目标回调注册表
///
/// Owner 标识 -> 归一化回调。方法形状适配由注册方完成，这里只存
/// `(timer_id, info) -> result` 一种形状。
///
/// 卸载 (unregister) 随时可能发生，包括触发进行中——执行器在每次
/// 触发前即时查表，查不到就按"目标不可用"处理。
#[derive(Default)]
pub struct TargetRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TimeoutHandler>, RandomState>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::with_hasher(RandomState::new())),
        }
    }

    /// 注册目标回调，同名覆盖
    pub fn register(&self, owner: &str, handler: Arc<dyn TimeoutHandler>) {
        self.handlers.write().insert(owner.to_string(), handler);
    }

    /// 卸载目标
    ///
    /// 进行中的触发不会被打断，但之后的到期会被按"目标不可用"跳过。
    pub fn unregister(&self, owner: &str) {
        self.handlers.write().remove(owner);
    }

    /// O(1) 查表
    pub fn get(&self, owner: &str) -> Option<Arc<dyn TimeoutHandler>> {
        self.handlers.read().get(owner).cloned()
    }

    pub fn contains(&self, owner: &str) -> bool {
        self.handlers.read().contains_key(owner)
    }
}

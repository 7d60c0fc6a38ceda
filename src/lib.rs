// 1. 基础模块
pub mod common;

// 2. 日历表达式与下次触发计算
pub mod schedule;

// 3. 核心接口与实现
pub mod invoker;
pub mod persistence;
pub mod policy;

// 4. 调度器核心
pub mod scheduler;

// 5. 对外门面 (Facade)
pub mod service;

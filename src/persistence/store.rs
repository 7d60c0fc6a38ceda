use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{trace, warn};

use crate::common::config::StoreConfig;
use crate::common::error::{Result, TimerError};
use crate::common::model::{TimerRecord, TimerState};
use crate::persistence::traits::RecordBackend;

// ==========================================
// 1. 加载结果 (LoadStatus / LoadReport)
// ==========================================

/// 单条记录的加载状态
#[derive(Debug)]
pub enum LoadStatus {
    /// 成功加载：数据存在且完整
    Found(TimerRecord),
    /// 数据不存在
    NotFound,
    /// 数据损坏：存在但无法解析（如 JSON 反序列化失败）
    DataCorrupted { reason: String },
}

/// 全量加载报告
///
/// 损坏的记录被跳过并列在 `skipped` 里，绝不让一条坏数据拖垮整个启动；
/// 停机前处于 InProgress 的模糊记录单独列出，由恢复策略裁决。
#[derive(Debug, Default)]
pub struct LoadReport {
    /// 正常加载的记录 (含 InProgress 的)
    pub records: Vec<TimerRecord>,
    /// 跳过的损坏记录: (ID, 原因)
    pub skipped: Vec<(String, String)>,
    /// 其中停机前处于 InProgress 状态的记录 ID
    pub in_progress: Vec<String>,
}

// ==========================================
// 2. 定时器存储 (TimerStore)
// ==========================================

/// 定时器存储
///
/// 把注入的字节后端包装成面向 `TimerRecord` 的存储：
/// - 序列化格式 (JSON) 是这里的事，后端只见字节；
/// - 写入/删除带有限次数的内部重试，抖动不直接打穿到调用方；
/// - 非持久化记录永远不落后端。
pub struct TimerStore {
    backend: Arc<dyn RecordBackend>,
    config: StoreConfig,
}

impl TimerStore {
    pub fn new(backend: Arc<dyn RecordBackend>, config: StoreConfig) -> Self {
        Self { backend, config }
    }

    /// 首次入库
    pub async fn persist(&self, record: &TimerRecord) -> Result<()> {
        if !record.persistent {
            return Ok(());
        }
        self.write(record).await
    }

    /// 状态变更落库 (覆盖写)
    pub async fn update(&self, record: &TimerRecord) -> Result<()> {
        if !record.persistent {
            return Ok(());
        }
        self.write(record).await
    }

    /// 删除
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut last_err = None;
        for attempt in 1..=self.config.write_attempts {
            match self.backend.delete(id).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    trace!("[Store] Delete {} attempt {} failed: {:?}", id, attempt, e);
                    last_err = Some(e);
                    sleep(Duration::from_millis(self.config.write_retry_delay_ms)).await;
                }
            }
        }
        Err(self.exhausted("delete", id, last_err))
    }

    /// 按 ID 加载单条
    pub async fn load(&self, id: &str) -> Result<LoadStatus> {
        match self.backend.get(id).await? {
            None => Ok(LoadStatus::NotFound),
            Some(bytes) => match serde_json::from_slice::<TimerRecord>(&bytes) {
                Ok(record) => Ok(LoadStatus::Found(record)),
                Err(e) => Ok(LoadStatus::DataCorrupted {
                    reason: e.to_string(),
                }),
            },
        }
    }

    /// 启动全量加载
    ///
    /// 损坏记录: 跳过 + 上报，顺手从后端删掉，避免每次重启都绊一跤。
    pub async fn load_all(&self) -> Result<LoadReport> {
        let mut report = LoadReport::default();

        for (id, bytes) in self.backend.scan_all().await? {
            match serde_json::from_slice::<TimerRecord>(&bytes) {
                Ok(record) => {
                    if record.state == TimerState::InProgress {
                        report.in_progress.push(record.id.clone());
                    }
                    report.records.push(record);
                }
                Err(e) => {
                    warn!("[Store] Skipping corrupt record {}: {}", id, e);
                    report.skipped.push((id.clone(), e.to_string()));
                    // 损坏数据是毒丸，留着只会反复失败
                    let _ = self.backend.delete(&id).await;
                }
            }
        }
        Ok(report)
    }

    /// 带重试的写入
    async fn write(&self, record: &TimerRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        let mut last_err = None;
        for attempt in 1..=self.config.write_attempts {
            match self.backend.put(&record.id, &bytes).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    trace!(
                        "[Store] Put {} attempt {} failed: {:?}",
                        record.id, attempt, e
                    );
                    last_err = Some(e);
                    sleep(Duration::from_millis(self.config.write_retry_delay_ms)).await;
                }
            }
        }
        Err(self.exhausted("put", &record.id, last_err))
    }

    fn exhausted(&self, op: &'static str, id: &str, last_err: Option<TimerError>) -> TimerError {
        TimerError::Persistence {
            op,
            timer_id: id.to_string(),
            attempts: self.config.write_attempts,
            message: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".into()),
        }
    }
}

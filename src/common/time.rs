use chrono::{DateTime, TimeZone, Utc};

/// 全局统一的时间工具
pub struct TimeUtils;

impl TimeUtils {
    /// [标准] 获取当前 UTC 时间
    /// 全系统统一使用这个方法获取"现在"，方便未来 Mock 或做时钟偏移
    pub fn now() -> DateTime<Utc> {
        Utc::now()
    }

    /// 获取当前 Unix 毫秒时间戳
    /// 调度索引的 Key 用毫秒整数，避免把 DateTime 塞进 BTreeMap
    pub fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// DateTime -> 毫秒时间戳
    pub fn to_millis(dt: DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    /// 毫秒时间戳 -> DateTime
    ///
    /// 超出 chrono 可表示范围的输入退化为 Unix 纪元，调度上等价于"立即到期"。
    pub fn from_millis(millis: i64) -> DateTime<Utc> {
        match Utc.timestamp_millis_opt(millis) {
            chrono::LocalResult::Single(dt) => dt,
            _ => DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

use nanoid::nanoid;
use rand::Rng;
use std::time::Duration;

// ==========================================
// 1. ID 生成工具 (Identity Utilities)
// ==========================================

/// 生成全局唯一的定时器 ID (NanoID)
///
/// 使用 NanoID 替换 UUID。
/// - 长度: 21 字符
/// - 字符集: A-Za-z0-9 (不含 - 和 _ 以便双击选中)
/// - 优势: 比 UUID 更短，URL 友好，生成速度更快。
#[inline]
pub fn new_timer_id() -> String {
    const ALPHABET: [char; 62] = [
        '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h',
        'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
        'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R',
        'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
    ];
    nanoid!(21, &ALPHABET)
}

// ==========================================
// 2. 算法工具 (Algorithmic Utilities)
// ==========================================

/// 计算指数退避时间 (Exponential Backoff with Jitter)
///
/// - attempt: 当前重试次数 (1, 2, 3...)
/// - base_delay: 基础延迟 (例如 1s)
/// - max_delay: 最大延迟 (例如 60s)
pub fn calculate_backoff(attempt: u32, base_delay: Duration, max_delay: Duration) -> Duration {
    let mut rng = rand::rng();

    // 1. 计算指数部分: base * 2^(attempt-1)
    let exponent = 2u32.saturating_pow(attempt.saturating_sub(1).min(20));
    let mut backoff = base_delay.as_secs_f64() * (exponent as f64);

    // 2. 限制最大值 (Cap)
    if backoff > max_delay.as_secs_f64() {
        backoff = max_delay.as_secs_f64();
    }

    // 3. 添加抖动 (Full Jitter)
    // 随机取 [0, backoff] 之间的值，比 Equal Jitter 更能平滑负载
    let jittered = rng.random_range(0.0..=backoff);

    // 4. 保证最小延迟 (防止 0ms)
    let final_secs = jittered.max(0.01); // 至少 10ms

    Duration::from_secs_f64(final_secs)
}

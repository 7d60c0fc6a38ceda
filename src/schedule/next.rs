use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Utc,
};

use crate::common::model::Schedule;
use crate::schedule::CalendarExpression;

/// 下次到期计算器
///
/// 对三种调度计划给出统一的"下一次到期"答案：
/// - 日历: 从秒到年逐字段推进，进位时低位字段复位到最小合法值；
/// - 间隔: 纯算术 (`last_fire + every`)，过去的到期被夹到"现在"，
///   保证停机错过的多次到期只补触发一次，之后从现在续排；
/// - 单次: 触发过即没有下一次。
#[derive(Debug, Clone, Copy)]
pub struct NextTimeoutCalculator {
    /// 前向搜索窗口 (年)。窗口内找不到任何到期视为不可满足。
    lookahead_years: u32,
}

impl NextTimeoutCalculator {
    pub fn new(lookahead_years: u32) -> Self {
        Self {
            lookahead_years: lookahead_years.max(1),
        }
    }

    /// 首次到期 (创建或从存储恢复时调用)
    pub fn initial(
        &self,
        schedule: &Schedule,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match schedule {
            // 单次: 就是那个时刻，哪怕已经过去 (调度器会立即派发)
            Schedule::At(at) => Some(*at),

            // 间隔: 创建时间 + 初始延迟
            Schedule::Interval { initial_delay, .. } => {
                Some(created_at + Duration::from_std(*initial_delay).ok()?)
            }

            // 日历: 从"现在"起 (含) 的第一个匹配时刻
            Schedule::Calendar(expr) => self.next_calendar(expr, now, true),
        }
    }

    /// 成功触发后的下一次到期
    pub fn following(
        &self,
        schedule: &Schedule,
        fired_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match schedule {
            // 单次: 没有下一次
            Schedule::At(_) => None,

            // 间隔: 上次触发 + 间隔；已经过去则夹到现在 (单次补触发规则)
            Schedule::Interval { every, .. } => {
                let target = fired_at + Duration::from_std(*every).ok()?;
                Some(target.max(now))
            }

            // 日历: 严格晚于"现在"的下一个匹配时刻
            Schedule::Calendar(expr) => self.next_calendar(expr, now, false),
        }
    }

    /// 日历表达式的下一次到期
    ///
    /// `inclusive` 为 true 时 `after` 本身也是候选 (用于计算首次到期)。
    pub fn next_calendar(
        &self,
        expr: &CalendarExpression,
        after: DateTime<Utc>,
        inclusive: bool,
    ) -> Option<DateTime<Utc>> {
        let mut from = if inclusive {
            after
        } else {
            after + Duration::seconds(1)
        };
        // start 边界: 边界之下从边界起搜 (含边界)
        if let Some(start) = expr.start_bound() {
            if from < start {
                from = start;
            }
        }

        let tz = expr.timezone();
        let deadline_utc = after + Duration::days(366 * self.lookahead_years as i64);
        let deadline_local = deadline_utc.with_timezone(&tz).naive_local();

        // 候选从整秒开始；表达式不关心亚秒部分
        let mut cursor: NaiveDateTime = from.with_timezone(&tz).naive_local().with_nanosecond(0)?;

        loop {
            // 年份剪枝: 显式年份集合走完了就不会再有到期
            if let Some(max_year) = expr.years.as_ref().and_then(|ys| ys.last().copied()) {
                if cursor.year() > max_year as i32 {
                    return None;
                }
            }
            if cursor > deadline_local {
                return None;
            }

            // 1. 定日期: 当天命中就从当前时刻找，否则跳到下一个命中日并把
            //    时分秒复位到最小合法值 (进位规则)
            let candidate = if expr.day_matches(cursor.date()) {
                match next_time_of_day(expr, cursor.time()) {
                    Some(t) => NaiveDateTime::new(cursor.date(), t),
                    None => {
                        let next_day = next_matching_day(expr, cursor.date(), deadline_local.date())?;
                        NaiveDateTime::new(next_day, first_time_of_day(expr)?)
                    }
                }
            } else {
                let next_day = next_matching_day(expr, cursor.date(), deadline_local.date())?;
                NaiveDateTime::new(next_day, first_time_of_day(expr)?)
            };

            // 2. 落到真实时区
            match tz.from_local_datetime(&candidate) {
                LocalResult::Single(dt) => {
                    return self.check_end(expr, dt.with_timezone(&Utc));
                }
                // 夏令时回拨造成的二义时刻: 取较早的偏移
                LocalResult::Ambiguous(earliest, _) => {
                    return self.check_end(expr, earliest.with_timezone(&Utc));
                }
                // 夏令时跳进造成的缺失时刻: 逐分钟前移，跳过整个空洞
                LocalResult::None => {
                    cursor = candidate + Duration::minutes(1);
                }
            }
        }
    }

    /// 结束边界检查
    fn check_end(
        &self,
        expr: &CalendarExpression,
        candidate: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match expr.end_bound() {
            Some(end) if candidate > end => None,
            _ => Some(candidate),
        }
    }
}

/// 从 `t` (含) 起当天内最早的匹配时刻；当天已走完返回 None
///
/// 三层嵌套推进: 秒进位到分，分进位到时。每当高位字段前移，
/// 低位字段复位到各自最小合法值。
fn next_time_of_day(expr: &CalendarExpression, t: NaiveTime) -> Option<NaiveTime> {
    let (h, m, s) = (t.hour(), t.minute(), t.second());

    for &hour in &expr.hours {
        if hour < h {
            continue;
        }
        if hour > h {
            return make_time(hour, *expr.minutes.first()?, *expr.seconds.first()?);
        }
        // hour == h: 在当前小时里找分钟
        for &minute in &expr.minutes {
            if minute < m {
                continue;
            }
            if minute > m {
                return make_time(h, minute, *expr.seconds.first()?);
            }
            // minute == m: 在当前分钟里找秒
            for &second in &expr.seconds {
                if second >= s {
                    return make_time(h, m, second);
                }
            }
            // 秒走完 -> 推进到下一个匹配分钟
        }
        // 分钟走完 -> 推进到下一个匹配小时
    }
    None
}

/// 当天的最小合法时刻 (首时/首分/首秒)
fn first_time_of_day(expr: &CalendarExpression) -> Option<NaiveTime> {
    make_time(
        *expr.hours.first()?,
        *expr.minutes.first()?,
        *expr.seconds.first()?,
    )
}

fn make_time(h: u32, m: u32, s: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(h, m, s)
}

/// 严格晚于 `date` 的下一个命中日；超出搜索边界返回 None
///
/// 逐日扫描足够了: 边界最多几千天，而且保证最小性 (不会跳过任何命中日)。
fn next_matching_day(
    expr: &CalendarExpression,
    date: NaiveDate,
    deadline: NaiveDate,
) -> Option<NaiveDate> {
    let mut d = date.succ_opt()?;
    while !expr.day_matches(d) {
        if d > deadline {
            return None;
        }
        d = d.succ_opt()?;
    }
    Some(d)
}

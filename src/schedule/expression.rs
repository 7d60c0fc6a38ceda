use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::attribute::{
    DayOfMonthSet, ParseErrorKind, ScheduleField, ScheduleParseError, parse_day_of_month,
    parse_numeric_field,
};

// ==========================================
// 1. 原始字段形式 (ScheduleSpec)
// ==========================================

/// 日历表达式的原始字段形式
///
/// - 构建 `CalendarExpression` 的入口，也是它的持久化形式。
/// - second..day-of-week 缺失 (None) 是校验错误；year 缺失默认 `*`。
/// - 时区为 IANA 标识，缺失默认 UTC；start/end 是可选的绝对边界。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub second: Option<String>,
    pub minute: Option<String>,
    pub hour: Option<String>,
    pub day_of_month: Option<String>,
    pub month: Option<String>,
    pub day_of_week: Option<String>,
    pub year: Option<String>,
    pub timezone: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl ScheduleSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn second(mut self, v: impl Into<String>) -> Self {
        self.second = Some(v.into());
        self
    }

    pub fn minute(mut self, v: impl Into<String>) -> Self {
        self.minute = Some(v.into());
        self
    }

    pub fn hour(mut self, v: impl Into<String>) -> Self {
        self.hour = Some(v.into());
        self
    }

    pub fn day_of_month(mut self, v: impl Into<String>) -> Self {
        self.day_of_month = Some(v.into());
        self
    }

    pub fn month(mut self, v: impl Into<String>) -> Self {
        self.month = Some(v.into());
        self
    }

    pub fn day_of_week(mut self, v: impl Into<String>) -> Self {
        self.day_of_week = Some(v.into());
        self
    }

    pub fn year(mut self, v: impl Into<String>) -> Self {
        self.year = Some(v.into());
        self
    }

    pub fn timezone(mut self, v: impl Into<String>) -> Self {
        self.timezone = Some(v.into());
        self
    }

    pub fn start(mut self, v: DateTime<Utc>) -> Self {
        self.start = Some(v);
        self
    }

    pub fn end(mut self, v: DateTime<Utc>) -> Self {
        self.end = Some(v);
        self
    }

    /// 解析成不可变表达式
    pub fn parse(self) -> Result<CalendarExpression, ScheduleParseError> {
        CalendarExpression::parse(self)
    }
}

// ==========================================
// 2. 日历表达式 (CalendarExpression)
// ==========================================

/// 解析完成的日历表达式
///
/// - 构建即校验：每个字段必须解析成非空取值集合，否则构建失败并指明
///   是哪个字段、哪个 Token 出了问题。
/// - 构建后不可变。相等性比较的是解析后的取值集合 (`"0,1"` 与 `"0-1"` 相等)。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ScheduleSpec", into = "ScheduleSpec")]
pub struct CalendarExpression {
    /// 原始字段 (保留用于展示与序列化)
    pub(crate) spec: ScheduleSpec,

    // 解析后的取值集合 (有序去重)
    pub(crate) seconds: Vec<u32>,
    pub(crate) minutes: Vec<u32>,
    pub(crate) hours: Vec<u32>,
    pub(crate) dom: DayOfMonthSet,
    pub(crate) months: Vec<u32>,
    pub(crate) dow: Vec<u32>,
    /// None = 通配 (任意年份)
    pub(crate) years: Option<Vec<u32>>,

    // day-of-month / day-of-week 的通配标记，决定取并集的规则
    pub(crate) dom_wildcard: bool,
    pub(crate) dow_wildcard: bool,

    pub(crate) tz: Tz,
    pub(crate) start: Option<DateTime<Utc>>,
    pub(crate) end: Option<DateTime<Utc>>,
}

impl CalendarExpression {
    /// 解析原始字段
    pub fn parse(spec: ScheduleSpec) -> Result<Self, ScheduleParseError> {
        let required = |field: ScheduleField, raw: &Option<String>| -> Result<String, ScheduleParseError> {
            match raw {
                Some(v) => Ok(v.trim().to_string()),
                None => Err(ScheduleParseError {
                    field,
                    token: String::new(),
                    kind: ParseErrorKind::MissingField,
                }),
            }
        };

        let second_raw = required(ScheduleField::Second, &spec.second)?;
        let minute_raw = required(ScheduleField::Minute, &spec.minute)?;
        let hour_raw = required(ScheduleField::Hour, &spec.hour)?;
        let dom_raw = required(ScheduleField::DayOfMonth, &spec.day_of_month)?;
        let month_raw = required(ScheduleField::Month, &spec.month)?;
        let dow_raw = required(ScheduleField::DayOfWeek, &spec.day_of_week)?;
        // year 缺失默认通配
        let year_raw = spec.year.as_deref().unwrap_or("*").trim().to_string();

        let seconds = parse_numeric_field(ScheduleField::Second, &second_raw)?;
        let minutes = parse_numeric_field(ScheduleField::Minute, &minute_raw)?;
        let hours = parse_numeric_field(ScheduleField::Hour, &hour_raw)?;
        let dom = parse_day_of_month(&dom_raw)?;
        let months = parse_numeric_field(ScheduleField::Month, &month_raw)?;
        let dow = parse_numeric_field(ScheduleField::DayOfWeek, &dow_raw)?;
        let years = if year_raw == "*" {
            None
        } else {
            Some(parse_numeric_field(ScheduleField::Year, &year_raw)?)
        };

        let tz: Tz = match spec.timezone.as_deref().map(str::trim) {
            None | Some("") => Tz::UTC,
            Some(id) => id.parse().map_err(|_| ScheduleParseError {
                field: ScheduleField::Year, // 时区不属于任何字段，错误里只展示时区 ID
                token: id.to_string(),
                kind: ParseErrorKind::UnknownTimezone,
            })?,
        };

        let dom_wildcard = dom_raw == "*";
        let dow_wildcard = dow_raw == "*";

        // 归一化后的原始字段 (trim 过，year 补全)
        let normalized = ScheduleSpec {
            second: Some(second_raw),
            minute: Some(minute_raw),
            hour: Some(hour_raw),
            day_of_month: Some(dom_raw),
            month: Some(month_raw),
            day_of_week: Some(dow_raw),
            year: Some(year_raw),
            timezone: spec.timezone.clone(),
            start: spec.start,
            end: spec.end,
        };

        Ok(Self {
            spec: normalized,
            seconds,
            minutes,
            hours,
            dom,
            months,
            dow,
            years,
            dom_wildcard,
            dow_wildcard,
            tz,
            start: spec.start,
            end: spec.end,
        })
    }

    /// 表达式使用的时区
    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// 起始边界 (含)
    pub fn start_bound(&self) -> Option<DateTime<Utc>> {
        self.start
    }

    /// 结束边界 (含)
    pub fn end_bound(&self) -> Option<DateTime<Utc>> {
        self.end
    }

    /// 导出原始字段形式 (可再次 parse，得到相等的表达式)
    pub fn to_spec(&self) -> ScheduleSpec {
        self.spec.clone()
    }

    /// 瞬时成员判定
    ///
    /// 把时刻换算到表达式时区后，逐字段检查组件是否落在取值集合里。
    pub fn evaluate(&self, instant: DateTime<Utc>) -> bool {
        let local = instant.with_timezone(&self.tz);
        self.seconds.binary_search(&local.second()).is_ok()
            && self.minutes.binary_search(&local.minute()).is_ok()
            && self.hours.binary_search(&local.hour()).is_ok()
            && self.day_matches(local.date_naive())
    }

    /// 日期维度判定 (年/月/日/星期)
    ///
    /// day-of-month 和 day-of-week 同时非通配时取并集 (任一命中即可)。
    pub(crate) fn day_matches(&self, date: NaiveDate) -> bool {
        if let Some(years) = &self.years {
            let year = date.year();
            if year < 0 || years.binary_search(&(year as u32)).is_err() {
                return false;
            }
        }
        if self.months.binary_search(&date.month()).is_err() {
            return false;
        }

        let dom_hit =
            || self.dom.matches(date.year(), date.month(), date.day());
        let dow_hit =
            || self.dow.binary_search(&date.weekday().num_days_from_sunday()).is_ok();

        match (self.dom_wildcard, self.dow_wildcard) {
            (true, true) => true,
            (false, true) => dom_hit(),
            (true, false) => dow_hit(),
            // 两边都指定: 并集语义
            (false, false) => dom_hit() || dow_hit(),
        }
    }
}

// 相等性: 比较解析结果而不是原始字符串
impl PartialEq for CalendarExpression {
    fn eq(&self, other: &Self) -> bool {
        self.seconds == other.seconds
            && self.minutes == other.minutes
            && self.hours == other.hours
            && self.dom == other.dom
            && self.months == other.months
            && self.dow == other.dow
            && self.years == other.years
            && self.dom_wildcard == other.dom_wildcard
            && self.dow_wildcard == other.dow_wildcard
            && self.tz == other.tz
            && self.start == other.start
            && self.end == other.end
    }
}

impl From<CalendarExpression> for ScheduleSpec {
    fn from(expr: CalendarExpression) -> Self {
        expr.spec
    }
}

impl TryFrom<ScheduleSpec> for CalendarExpression {
    type Error = ScheduleParseError;

    fn try_from(spec: ScheduleSpec) -> Result<Self, Self::Error> {
        CalendarExpression::parse(spec)
    }
}

impl fmt::Display for CalendarExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = |v: &Option<String>| -> String { v.clone().unwrap_or_else(|| "*".into()) };
        write!(
            f,
            "second={} minute={} hour={} day-of-month={} month={} day-of-week={} year={}",
            field(&self.spec.second),
            field(&self.spec.minute),
            field(&self.spec.hour),
            field(&self.spec.day_of_month),
            field(&self.spec.month),
            field(&self.spec.day_of_week),
            field(&self.spec.year),
        )?;
        if let Some(tz) = &self.spec.timezone {
            write!(f, " timezone={}", tz)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn every_weekday_nine_to_five() -> CalendarExpression {
        ScheduleSpec::new()
            .second("0")
            .minute("0/15")
            .hour("9-17")
            .day_of_month("*")
            .month("*")
            .day_of_week("Mon-Fri")
            .parse()
            .unwrap()
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let err = ScheduleSpec::new()
            .second("0")
            .minute("0")
            .hour("0")
            .day_of_month("*")
            .month("*")
            // day_of_week 缺失
            .parse()
            .unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingField);
        assert_eq!(err.field, ScheduleField::DayOfWeek);
    }

    #[test]
    fn year_defaults_to_wildcard() {
        let expr = every_weekday_nine_to_five();
        assert!(expr.years.is_none());
        assert_eq!(expr.spec.year.as_deref(), Some("*"));
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let err = ScheduleSpec::new()
            .second("0")
            .minute("0")
            .hour("0")
            .day_of_month("*")
            .month("*")
            .day_of_week("*")
            .timezone("Mars/Olympus")
            .parse()
            .unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnknownTimezone);
    }

    #[test]
    fn evaluate_checks_all_components() {
        let expr = every_weekday_nine_to_five();
        // 2024-07-01 是周一
        let hit = Utc.with_ymd_and_hms(2024, 7, 1, 9, 15, 0).unwrap();
        let wrong_second = Utc.with_ymd_and_hms(2024, 7, 1, 9, 15, 30).unwrap();
        let saturday = Utc.with_ymd_and_hms(2024, 7, 6, 9, 15, 0).unwrap();
        assert!(expr.evaluate(hit));
        assert!(!expr.evaluate(wrong_second));
        assert!(!expr.evaluate(saturday));
    }

    #[test]
    fn dom_dow_union_when_both_specified() {
        // 15 号或周五: 任一命中即可
        let expr = ScheduleSpec::new()
            .second("0")
            .minute("0")
            .hour("12")
            .day_of_month("15")
            .month("*")
            .day_of_week("Fri")
            .parse()
            .unwrap();
        // 2024-03-15 是周五 (双命中), 2024-03-22 是周五 (仅 dow), 2024-04-15 是周一 (仅 dom)
        assert!(expr.day_matches(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()));
        assert!(expr.day_matches(NaiveDate::from_ymd_opt(2024, 3, 22).unwrap()));
        assert!(expr.day_matches(NaiveDate::from_ymd_opt(2024, 4, 15).unwrap()));
        assert!(!expr.day_matches(NaiveDate::from_ymd_opt(2024, 3, 14).unwrap()));
    }

    #[test]
    fn format_then_reparse_is_identity() {
        let expr = every_weekday_nine_to_five();
        let reparsed = expr.to_spec().parse().unwrap();
        assert_eq!(expr, reparsed);
    }

    #[test]
    fn equality_compares_resolved_sets() {
        let a = ScheduleSpec::new()
            .second("0,1")
            .minute("0")
            .hour("0")
            .day_of_month("*")
            .month("*")
            .day_of_week("*")
            .parse()
            .unwrap();
        let b = ScheduleSpec::new()
            .second("0-1")
            .minute("0")
            .hour("0")
            .day_of_month("*")
            .month("*")
            .day_of_week("*")
            .parse()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn serde_roundtrip_via_raw_fields() {
        let expr = every_weekday_nine_to_five();
        let json = serde_json::to_string(&expr).unwrap();
        let back: CalendarExpression = serde_json::from_str(&json).unwrap();
        assert_eq!(expr, back);
    }
}

use serde::{Deserialize, Serialize};

// ==========================================
// 1. 字段定义 (ScheduleField)
// ==========================================

/// 日历表达式的七个字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleField {
    Second,
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
    Year,
}

impl ScheduleField {
    pub fn name(&self) -> &'static str {
        match self {
            ScheduleField::Second => "second",
            ScheduleField::Minute => "minute",
            ScheduleField::Hour => "hour",
            ScheduleField::DayOfMonth => "day-of-month",
            ScheduleField::Month => "month",
            ScheduleField::DayOfWeek => "day-of-week",
            ScheduleField::Year => "year",
        }
    }

    /// 字段的合法数值区间 (含两端)
    fn bounds(&self) -> (u32, u32) {
        match self {
            ScheduleField::Second | ScheduleField::Minute => (0, 59),
            ScheduleField::Hour => (0, 23),
            ScheduleField::DayOfMonth => (1, 31),
            ScheduleField::Month => (1, 12),
            // 0 和 7 都是周日，解析后统一归一化到 0-6
            ScheduleField::DayOfWeek => (0, 7),
            ScheduleField::Year => (1000, 9999),
        }
    }

    /// 是否允许环绕区间 (如 day-of-week 的 Fri-Mon、day-of-month 的 27-3)
    ///
    /// 其他字段要求 a <= b。
    fn allows_wrap(&self) -> bool {
        matches!(self, ScheduleField::DayOfWeek | ScheduleField::DayOfMonth)
    }

    /// 字段的命名别名 (不区分大小写的三字母缩写)
    fn aliases(&self) -> &'static [(&'static str, u32)] {
        match self {
            ScheduleField::Month => &[
                ("jan", 1),
                ("feb", 2),
                ("mar", 3),
                ("apr", 4),
                ("may", 5),
                ("jun", 6),
                ("jul", 7),
                ("aug", 8),
                ("sep", 9),
                ("oct", 10),
                ("nov", 11),
                ("dec", 12),
            ],
            ScheduleField::DayOfWeek => &[
                ("sun", 0),
                ("mon", 1),
                ("tue", 2),
                ("wed", 3),
                ("thu", 4),
                ("fri", 5),
                ("sat", 6),
            ],
            _ => &[],
        }
    }
}

// ==========================================
// 2. 校验错误 (ScheduleParseError)
// ==========================================

/// 解析失败的具体原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// 必填字段缺失 (second..day-of-week 不允许为空)
    MissingField,
    /// Token 无法解析
    Unparseable,
    /// 数值超出字段区间
    OutOfRange { min: u32, max: u32 },
    /// 步长为零
    ZeroIncrement,
    /// 区间左端大于右端，且该字段不允许环绕
    InvertedRange,
    /// 字段解析结果为空集
    EmptySet,
    /// 未知时区标识
    UnknownTimezone,
}

/// 日历表达式校验错误
///
/// 必须能指明是哪个字段、哪个 Token、因为什么失败，
/// 这样调用方拿到错误就知道该改表达式的哪一处。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleParseError {
    pub field: ScheduleField,
    pub token: String,
    pub kind: ParseErrorKind,
}

impl std::error::Error for ScheduleParseError {}

impl std::fmt::Display for ScheduleParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let field = self.field.name();
        match &self.kind {
            ParseErrorKind::MissingField => {
                write!(f, "{} must not be null", field)
            }
            ParseErrorKind::Unparseable => {
                write!(f, "{}: unparseable token '{}'", field, self.token)
            }
            ParseErrorKind::OutOfRange { min, max } => {
                write!(f, "{}: value '{}' out of range {}-{}", field, self.token, min, max)
            }
            ParseErrorKind::ZeroIncrement => {
                write!(f, "{}: increment must be >= 1 in '{}'", field, self.token)
            }
            ParseErrorKind::InvertedRange => {
                write!(f, "{}: range '{}' is inverted and wraparound is not allowed here", field, self.token)
            }
            ParseErrorKind::EmptySet => {
                write!(f, "{}: '{}' resolves to an empty value set", field, self.token)
            }
            ParseErrorKind::UnknownTimezone => {
                write!(f, "unknown timezone id '{}'", self.token)
            }
        }
    }
}

impl ScheduleParseError {
    fn new(field: ScheduleField, token: &str, kind: ParseErrorKind) -> Self {
        Self {
            field,
            token: token.to_string(),
            kind,
        }
    }
}

// ==========================================
// 3. 数值字段解析 (Second/Minute/Hour/Month/DayOfWeek/Year)
// ==========================================

/// 解析一个纯数值字段，返回有序去重后的取值集合
///
/// 支持的语法 (逐项独立校验)：
/// - `*` 通配符 -> 整个合法区间
/// - 单值 / 命名别名 (`5`, `Fri`)
/// - 列表 (`1,3,Fri-Sat`)
/// - 区间 (`a-b`，day-of-week/day-of-month 允许 a > b 环绕)
/// - 步长 (`*/n`, `a/n`, `a-b/n`，n >= 1；`a/n` 意为 a 到区间上限)
pub(crate) fn parse_numeric_field(
    field: ScheduleField,
    raw: &str,
) -> Result<Vec<u32>, ScheduleParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ScheduleParseError::new(field, raw, ParseErrorKind::MissingField));
    }

    let mut values = Vec::new();
    for item in trimmed.split(',') {
        let item = item.trim();
        expand_item(field, item, &mut values)?;
    }

    normalize(field, &mut values);
    if values.is_empty() {
        return Err(ScheduleParseError::new(field, trimmed, ParseErrorKind::EmptySet));
    }
    Ok(values)
}

/// 展开单个列表项
fn expand_item(
    field: ScheduleField,
    item: &str,
    out: &mut Vec<u32>,
) -> Result<(), ScheduleParseError> {
    if item.is_empty() {
        return Err(ScheduleParseError::new(field, item, ParseErrorKind::Unparseable));
    }

    // 步长形式: base/n
    if let Some((base, step)) = item.split_once('/') {
        let step: u32 = step
            .trim()
            .parse()
            .map_err(|_| ScheduleParseError::new(field, item, ParseErrorKind::Unparseable))?;
        if step == 0 {
            return Err(ScheduleParseError::new(field, item, ParseErrorKind::ZeroIncrement));
        }
        let seq = expand_base(field, base.trim(), item, true)?;
        out.extend(seq.into_iter().step_by(step as usize));
        return Ok(());
    }

    out.extend(expand_base(field, item, item, false)?);
    Ok(())
}

/// 展开步长的基底或普通项: `*`、单值、区间
///
/// 返回的序列保持调度顺序 (环绕区间按环绕顺序)，供步长抽取。
/// `open_end`: `a/n` 形式里裸值基底意为 "a 到区间上限"。
fn expand_base(
    field: ScheduleField,
    base: &str,
    whole_token: &str,
    open_end: bool,
) -> Result<Vec<u32>, ScheduleParseError> {
    let (min, max) = field.bounds();

    if base == "*" {
        return Ok((min..=max).collect());
    }

    if let Some((lo_raw, hi_raw)) = split_range(base) {
        let lo = parse_value(field, lo_raw.trim(), whole_token)?;
        let hi = parse_value(field, hi_raw.trim(), whole_token)?;
        return expand_range(field, lo, hi, whole_token);
    }

    let value = parse_value(field, base, whole_token)?;
    if open_end {
        // `a/n`: 从 a 起步，到区间上限
        Ok((value..=max).collect())
    } else {
        Ok(vec![value])
    }
}

/// 在不破坏负数 Token 的前提下切出区间
///
/// day-of-month 的 `-3` 不是区间；只有两端都非空才算 `a-b`。
fn split_range(base: &str) -> Option<(&str, &str)> {
    // 跳过开头的负号再找 '-'
    let search_from = if base.starts_with('-') { 1 } else { 0 };
    let idx = base[search_from..].find('-')? + search_from;
    let (lo, hi) = (&base[..idx], &base[idx + 1..]);
    if lo.trim().is_empty() || hi.trim().is_empty() {
        return None;
    }
    Some((lo, hi))
}

/// 按环绕规则展开区间
fn expand_range(
    field: ScheduleField,
    lo: u32,
    hi: u32,
    whole_token: &str,
) -> Result<Vec<u32>, ScheduleParseError> {
    let (min, max) = field.bounds();
    if lo <= hi {
        return Ok((lo..=hi).collect());
    }
    if !field.allows_wrap() {
        return Err(ScheduleParseError::new(field, whole_token, ParseErrorKind::InvertedRange));
    }
    // 环绕: lo..=max 接 min..=hi (day-of-week 先归一化再环绕，见 normalize)
    let mut seq: Vec<u32> = (lo..=max).collect();
    seq.extend(min..=hi);
    Ok(seq)
}

/// 解析单个取值: 数字或命名别名
fn parse_value(
    field: ScheduleField,
    token: &str,
    whole_token: &str,
) -> Result<u32, ScheduleParseError> {
    let (min, max) = field.bounds();

    if let Ok(v) = token.parse::<u32>() {
        if v < min || v > max {
            return Err(ScheduleParseError::new(
                field,
                token,
                ParseErrorKind::OutOfRange { min, max },
            ));
        }
        return Ok(v);
    }

    let lowered = token.to_ascii_lowercase();
    for (alias, value) in field.aliases() {
        if *alias == lowered {
            return Ok(*value);
        }
    }

    Err(ScheduleParseError::new(field, whole_token, ParseErrorKind::Unparseable))
}

/// 归一化: day-of-week 的 7 折回 0，排序去重
fn normalize(field: ScheduleField, values: &mut Vec<u32>) {
    if field == ScheduleField::DayOfWeek {
        for v in values.iter_mut() {
            *v %= 7;
        }
    }
    values.sort_unstable();
    values.dedup();
}

// ==========================================
// 4. Day-Of-Month 字段 (含相对形式)
// ==========================================

/// 相对序数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Ordinal {
    First,
    Second,
    Third,
    Fourth,
    Fifth,
    Last,
}

impl Ordinal {
    fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "1st" => Some(Ordinal::First),
            "2nd" => Some(Ordinal::Second),
            "3rd" => Some(Ordinal::Third),
            "4th" => Some(Ordinal::Fourth),
            "5th" => Some(Ordinal::Fifth),
            "last" => Some(Ordinal::Last),
            _ => None,
        }
    }
}

/// day-of-month 的相对 Token
///
/// 这些形式依赖具体的 (年, 月) 才能落到实际日期，所以保持符号化，
/// 由 `resolve` 逐月求值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum DomToken {
    /// `Last`: 当月最后一天
    Last,
    /// `-N`: 最后一天的前 N 天 (1 <= N <= 7)
    NegOffset(u32),
    /// `<序数> <星期>`: 当月第 N 个/最后一个某星期 (dow 已归一化到 0-6)
    NthWeekday(Ordinal, u32),
}

impl DomToken {
    /// 在指定月份里求出实际日期；该月不存在 (如第 5 个周一) 返回 None
    pub(crate) fn resolve(&self, year: i32, month: u32) -> Option<u32> {
        let last_day = days_in_month(year, month);
        match self {
            DomToken::Last => Some(last_day),
            DomToken::NegOffset(n) => Some(last_day - n),
            DomToken::NthWeekday(ordinal, dow) => {
                // 当月 1 号是星期几 (0 = 周日)
                let first_dow = weekday_of(year, month, 1);
                match ordinal {
                    Ordinal::Last => {
                        let last_dow = weekday_of(year, month, last_day);
                        let back = (last_dow + 7 - dow) % 7;
                        Some(last_day - back)
                    }
                    _ => {
                        let nth = match ordinal {
                            Ordinal::First => 0,
                            Ordinal::Second => 1,
                            Ordinal::Third => 2,
                            Ordinal::Fourth => 3,
                            Ordinal::Fifth => 4,
                            Ordinal::Last => unreachable!(),
                        };
                        let day = 1 + (dow + 7 - first_dow) % 7 + 7 * nth;
                        (day <= last_day).then_some(day)
                    }
                }
            }
        }
    }
}

/// 解析后的 day-of-month 字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct DayOfMonthSet {
    /// 普通数值日 (有序去重)
    pub(crate) days: Vec<u32>,
    /// 相对形式，逐月求值
    pub(crate) relatives: Vec<DomToken>,
}

impl DayOfMonthSet {
    /// 指定日期是否命中
    pub(crate) fn matches(&self, year: i32, month: u32, day: u32) -> bool {
        if self.days.binary_search(&day).is_ok() {
            return true;
        }
        self.relatives
            .iter()
            .any(|token| token.resolve(year, month) == Some(day))
    }
}

/// 解析 day-of-month 字段
///
/// 每个列表项先按普通数值语法解析；只有普通语法不匹配时才尝试相对形式
/// (`Last`、`-N`、`3rd Fri`)。两种语法都失败时报出具体的项。
pub(crate) fn parse_day_of_month(raw: &str) -> Result<DayOfMonthSet, ScheduleParseError> {
    let field = ScheduleField::DayOfMonth;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ScheduleParseError::new(field, raw, ParseErrorKind::MissingField));
    }

    let mut days = Vec::new();
    let mut relatives = Vec::new();

    for item in trimmed.split(',') {
        let item = item.trim();

        // 先走普通数值语法
        let mut plain = Vec::new();
        match expand_item(field, item, &mut plain) {
            Ok(()) => {
                days.extend(plain);
                continue;
            }
            Err(plain_err) => {
                // 普通语法失败才尝试相对形式
                if let Some(token) = parse_relative_item(item)? {
                    relatives.push(token);
                    continue;
                }
                // 两边都不认识: 数值语法的错误信息更具体，按它上报
                return Err(plain_err);
            }
        }
    }

    days.sort_unstable();
    days.dedup();
    relatives.dedup();

    if days.is_empty() && relatives.is_empty() {
        return Err(ScheduleParseError::new(field, trimmed, ParseErrorKind::EmptySet));
    }
    Ok(DayOfMonthSet { days, relatives })
}

/// 尝试把一个列表项解析成相对形式
///
/// 返回 Ok(None) 表示"不是相对形式" (交回普通语法的错误)；
/// 形如相对语法但数值非法 (如 `-9`) 会直接报错。
fn parse_relative_item(item: &str) -> Result<Option<DomToken>, ScheduleParseError> {
    let field = ScheduleField::DayOfMonth;

    if item.eq_ignore_ascii_case("last") {
        return Ok(Some(DomToken::Last));
    }

    // `-N`: 最后一天前 N 天
    if let Some(rest) = item.strip_prefix('-') {
        if let Ok(n) = rest.trim().parse::<u32>() {
            if n < 1 || n > 7 {
                return Err(ScheduleParseError::new(
                    field,
                    item,
                    ParseErrorKind::OutOfRange { min: 1, max: 7 },
                ));
            }
            return Ok(Some(DomToken::NegOffset(n)));
        }
        return Ok(None);
    }

    // `<序数> <星期>`
    let mut parts = item.split_whitespace();
    if let (Some(ord_raw), Some(day_raw), None) = (parts.next(), parts.next(), parts.next()) {
        if let Some(ordinal) = Ordinal::parse(ord_raw) {
            let dow = parse_value(ScheduleField::DayOfWeek, day_raw, item)
                .map_err(|mut e| {
                    // 错误归属到 day-of-month 字段，Token 指向整个项
                    e.field = field;
                    e.token = item.to_string();
                    e
                })?
                % 7;
            return Ok(Some(DomToken::NthWeekday(ordinal, dow)));
        }
    }

    Ok(None)
}

// ==========================================
// 5. 日期小工具
// ==========================================

/// 当月天数
pub(crate) fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}

/// 星期几 (0 = 周日)，基于 chrono
fn weekday_of(year: i32, month: u32, day: u32) -> u32 {
    use chrono::Datelike;
    chrono::NaiveDate::from_ymd_opt(year, month, day)
        .map(|d| d.weekday().num_days_from_sunday())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(field: ScheduleField, raw: &str) -> Vec<u32> {
        parse_numeric_field(field, raw).unwrap()
    }

    #[test]
    fn wildcard_expands_to_full_range() {
        assert_eq!(parse(ScheduleField::Hour, "*"), (0..=23).collect::<Vec<_>>());
        assert_eq!(parse(ScheduleField::Month, "*"), (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn lists_ranges_and_names() {
        assert_eq!(parse(ScheduleField::Minute, "0,15,30,45"), vec![0, 15, 30, 45]);
        assert_eq!(parse(ScheduleField::Hour, "9-17"), (9..=17).collect::<Vec<_>>());
        assert_eq!(parse(ScheduleField::Month, "Jan,jun,DEC"), vec![1, 6, 12]);
        assert_eq!(parse(ScheduleField::DayOfWeek, "Mon-Fri"), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn day_of_week_zero_and_seven_are_sunday() {
        assert_eq!(parse(ScheduleField::DayOfWeek, "0"), vec![0]);
        assert_eq!(parse(ScheduleField::DayOfWeek, "7"), vec![0]);
        assert_eq!(parse(ScheduleField::DayOfWeek, "5-7"), vec![0, 5, 6]);
    }

    #[test]
    fn day_of_week_wraparound() {
        // Fri-Mon 环绕: 周五六日一
        assert_eq!(parse(ScheduleField::DayOfWeek, "Fri-Mon"), vec![0, 1, 5, 6]);
    }

    #[test]
    fn day_of_month_wraparound() {
        let set = parse_day_of_month("27-3").unwrap();
        assert_eq!(set.days, vec![1, 2, 3, 27, 28, 29, 30, 31]);
    }

    #[test]
    fn increments() {
        assert_eq!(parse(ScheduleField::Minute, "*/15"), vec![0, 15, 30, 45]);
        assert_eq!(parse(ScheduleField::Minute, "0/15"), vec![0, 15, 30, 45]);
        assert_eq!(parse(ScheduleField::Hour, "9-17/4"), vec![9, 13, 17]);
        assert_eq!(parse(ScheduleField::Second, "30/10"), vec![30, 40, 50]);
    }

    #[test]
    fn zero_increment_is_rejected() {
        let err = parse_numeric_field(ScheduleField::Minute, "*/0").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::ZeroIncrement);
        assert_eq!(err.field, ScheduleField::Minute);
    }

    #[test]
    fn inverted_range_rejected_where_wrap_is_illegal() {
        let err = parse_numeric_field(ScheduleField::Hour, "17-9").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvertedRange);
    }

    #[test]
    fn out_of_range_value_names_field_and_bounds() {
        let err = parse_numeric_field(ScheduleField::Second, "61").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::OutOfRange { min: 0, max: 59 });
        assert!(err.to_string().contains("second"));
    }

    #[test]
    fn malformed_list_item_is_reported() {
        // 列表里混着一个坏项: 错误必须指向坏项而不是整个列表
        let err = parse_numeric_field(ScheduleField::Minute, "1-5,x").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Unparseable);
        assert_eq!(err.token, "x");
    }

    #[test]
    fn relative_day_of_month_forms() {
        let set = parse_day_of_month("Last").unwrap();
        assert!(set.matches(2024, 2, 29));
        assert!(!set.matches(2023, 2, 29));
        assert!(set.matches(2023, 2, 28));

        let set = parse_day_of_month("-1").unwrap();
        // 最后一天的前一天
        assert!(set.matches(2024, 1, 30));
        assert!(!set.matches(2024, 1, 31));

        let set = parse_day_of_month("1st Mon").unwrap();
        // 2024-07 的第一个周一是 7 月 1 日
        assert!(set.matches(2024, 7, 1));
        assert!(!set.matches(2024, 7, 8));

        let set = parse_day_of_month("Last Fri").unwrap();
        // 2024-08 的最后一个周五是 30 日
        assert!(set.matches(2024, 8, 30));
    }

    #[test]
    fn fifth_weekday_may_not_exist() {
        let token = DomToken::NthWeekday(Ordinal::Fifth, 1);
        // 2024-07 有五个周一 (1,8,15,22,29)
        assert_eq!(token.resolve(2024, 7), Some(29));
        // 2024-06 只有四个周一
        assert_eq!(token.resolve(2024, 6), None);
    }

    #[test]
    fn neg_offset_out_of_range() {
        let err = parse_day_of_month("-9").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::OutOfRange { min: 1, max: 7 });
    }

    #[test]
    fn mixed_plain_and_relative_list() {
        let set = parse_day_of_month("1,15,Last").unwrap();
        assert_eq!(set.days, vec![1, 15]);
        assert!(set.matches(2024, 4, 30));
        assert!(set.matches(2024, 4, 15));
        assert!(!set.matches(2024, 4, 29));
    }
}

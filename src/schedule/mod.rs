pub mod attribute;
pub mod expression;
pub mod next;

pub use attribute::{ParseErrorKind, ScheduleField, ScheduleParseError};
pub use expression::{CalendarExpression, ScheduleSpec};
pub use next::NextTimeoutCalculator;

use std::sync::LazyLock;

use chrono::{
    Datelike, Duration, Local, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday,
};
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use super::{BuiltinFunction, FunctionTable, ParamNum, dispatch, int_arg};
use crate::{eval::error::EvalError, object::arg, value::Value};

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const WEEKDAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

const DATE_FORMATS: [&str; 8] = [
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%B %d, %Y %H:%M:%S",
];

const DAY_FORMATS: [&str; 4] = ["%m/%d/%Y", "%Y-%m-%d", "%Y/%m/%d", "%B %d, %Y"];

const TIME_FORMATS: [&str; 4] = ["%I:%M:%S %p", "%I:%M %p", "%H:%M:%S", "%H:%M"];

/// Day zero of the date serial; a bare time of day lives on this date.
fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or_default()
}

/// Renders a date the way the runtime stores it: `M/D/YYYY h:mm:ss AM`,
/// dropping the time at midnight and the date for a bare time of day.
pub fn format_datetime(datetime: NaiveDateTime) -> String {
    let date = datetime.date();
    let time = datetime.time();

    if date == epoch() && time != NaiveTime::MIN {
        format_time(time)
    } else if time == NaiveTime::MIN {
        format_date(date)
    } else {
        format!("{} {}", format_date(date), format_time(time))
    }
}

fn format_date(date: NaiveDate) -> String {
    format!("{}/{}/{}", date.month(), date.day(), date.year())
}

fn format_time(time: NaiveTime) -> String {
    let (pm, hour) = time.hour12();
    format!(
        "{}:{:02}:{:02} {}",
        hour,
        time.minute(),
        time.second(),
        if pm { "PM" } else { "AM" }
    )
}

/// Parses the date and time spellings scripts commonly produce.
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            DAY_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
                .map(|date| date.and_time(NaiveTime::MIN))
        })
        .or_else(|| {
            TIME_FORMATS
                .iter()
                .find_map(|format| NaiveTime::parse_from_str(text, format).ok())
                .map(|time| epoch().and_time(time))
        })
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn date_arg(args: &[Value], index: usize, name: &str) -> Result<NaiveDateTime, EvalError> {
    parse_datetime(&arg(args, index).to_string())
        .ok_or_else(|| EvalError::TypeMismatch(name.to_string()))
}

fn date_value(datetime: NaiveDateTime) -> Value {
    Value::String(format_datetime(datetime))
}

/// `Weekday` numbering: 1 for `first_day`, counting forward.
fn weekday_number(weekday: Weekday, first_day: i64) -> i64 {
    let sunday_based = i64::from(weekday.num_days_from_sunday()) + 1;
    let first_day = if (1..=7).contains(&first_day) { first_day } else { 1 };
    (sunday_based - first_day).rem_euclid(7) + 1
}

fn add_months(datetime: NaiveDateTime, months: i64) -> Option<NaiveDateTime> {
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        datetime.checked_add_months(magnitude)
    } else {
        datetime.checked_sub_months(magnitude)
    }
}

fn date_add(interval: &str, amount: i64, datetime: NaiveDateTime) -> Option<NaiveDateTime> {
    match interval {
        "yyyy" => add_months(datetime, amount.checked_mul(12)?),
        "q" => add_months(datetime, amount.checked_mul(3)?),
        "m" => add_months(datetime, amount),
        "y" | "d" | "w" => datetime.checked_add_signed(Duration::try_days(amount)?),
        "ww" => datetime.checked_add_signed(Duration::try_weeks(amount)?),
        "h" => datetime.checked_add_signed(Duration::try_hours(amount)?),
        "n" => datetime.checked_add_signed(Duration::try_minutes(amount)?),
        "s" => datetime.checked_add_signed(Duration::try_seconds(amount)?),
        _ => None,
    }
}

fn month_index(datetime: NaiveDateTime) -> i64 {
    i64::from(datetime.year()) * 12 + i64::from(datetime.month0())
}

/// Counts the interval boundaries crossed between `from` and `to`.
fn date_diff(interval: &str, from: NaiveDateTime, to: NaiveDateTime) -> Option<i64> {
    let truncate = |datetime: NaiveDateTime, seconds: i64| {
        datetime.and_utc().timestamp().div_euclid(seconds)
    };

    Some(match interval {
        "yyyy" => i64::from(to.year() - from.year()),
        "q" => month_index(to).div_euclid(3) - month_index(from).div_euclid(3),
        "m" => month_index(to) - month_index(from),
        "y" | "d" => (to.date() - from.date()).num_days(),
        "w" => (to.date() - from.date()).num_days() / 7,
        "ww" => {
            let week_start = |datetime: NaiveDateTime| {
                datetime.date()
                    - Duration::days(i64::from(datetime.weekday().num_days_from_sunday()))
            };
            (week_start(to) - week_start(from)).num_days() / 7
        }
        "h" => truncate(to, 3600) - truncate(from, 3600),
        "n" => truncate(to, 60) - truncate(from, 60),
        "s" => truncate(to, 1) - truncate(from, 1),
        _ => return None,
    })
}

fn date_part(interval: &str, datetime: NaiveDateTime) -> Option<i64> {
    Some(match interval {
        "yyyy" => i64::from(datetime.year()),
        "q" => i64::from(datetime.month0() / 3 + 1),
        "m" => i64::from(datetime.month()),
        "y" => i64::from(datetime.ordinal()),
        "d" => i64::from(datetime.day()),
        "w" => weekday_number(datetime.weekday(), 1),
        "ww" => i64::from((datetime.ordinal0() + datetime.with_ordinal0(0)?.weekday().num_days_from_sunday()) / 7 + 1),
        "h" => i64::from(datetime.hour()),
        "n" => i64::from(datetime.minute()),
        "s" => i64::from(datetime.second()),
        _ => return None,
    })
}

fn interval_arg(args: &[Value], name: &str) -> Result<String, EvalError> {
    let interval = arg(args, 0).to_string().to_lowercase();
    if interval.is_empty() {
        Err(EvalError::InvalidArgument(name.to_string()))
    } else {
        Ok(interval)
    }
}

fn date_serial(year: i64, month: i64, day: i64) -> Option<NaiveDateTime> {
    let months = year.checked_mul(12)?.checked_add(month - 1)?;
    let first = NaiveDate::from_ymd_opt(
        i32::try_from(months.div_euclid(12)).ok()?,
        u32::try_from(months.rem_euclid(12) + 1).ok()?,
        1,
    )?;
    first
        .checked_add_signed(Duration::try_days(day - 1)?)
        .map(|date| date.and_time(NaiveTime::MIN))
}

fn time_serial(hour: i64, minute: i64, second: i64) -> Option<NaiveDateTime> {
    let seconds = hour
        .checked_mul(3600)?
        .checked_add(minute.checked_mul(60)?)?
        .checked_add(second)?;
    epoch()
        .and_time(NaiveTime::MIN)
        .checked_add_signed(Duration::try_seconds(seconds)?)
}

fn component(args: &[Value], name: &str, part: fn(NaiveDateTime) -> u32) -> Result<Value, EvalError> {
    if arg(args, 0).is_null() {
        return Ok(Value::Null);
    }
    Ok(Value::Integer(i64::from(part(date_arg(args, 0, name)?))))
}

fn out_of_range(name: &str) -> EvalError {
    EvalError::InvalidArgument(name.to_string())
}

/// `Now`, `Date`, `DateAdd` and the rest of the date/time functions.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateTimeFunctions;

impl FunctionTable for DateTimeFunctions {
    fn call(&self, name: &str, args: &[Value]) -> Result<Option<Value>, EvalError> {
        dispatch(&DATETIME_FUNCTIONS, name, args)
    }

    fn handles(&self, name: &str) -> bool {
        DATETIME_FUNCTIONS.contains_key(name)
    }
}

pub static DATETIME_FUNCTIONS: LazyLock<FxHashMap<SmolStr, BuiltinFunction>> =
    LazyLock::new(|| {
        let mut map = FxHashMap::default();

        map.insert(
            SmolStr::new("now"),
            BuiltinFunction::new(ParamNum::None, |_| {
                Ok(date_value(now().with_nanosecond(0).unwrap_or_else(now)))
            }),
        );
        map.insert(
            SmolStr::new("date"),
            BuiltinFunction::new(ParamNum::None, |_| {
                Ok(Value::String(format_date(now().date())))
            }),
        );
        map.insert(
            SmolStr::new("time"),
            BuiltinFunction::new(ParamNum::None, |_| {
                Ok(Value::String(format_time(now().time())))
            }),
        );
        map.insert(
            SmolStr::new("timer"),
            BuiltinFunction::new(ParamNum::None, |_| {
                let time = now().time();
                Ok(Value::Float(
                    f64::from(time.num_seconds_from_midnight())
                        + f64::from(time.nanosecond() / 10_000_000) / 100.0,
                ))
            }),
        );
        map.insert(
            SmolStr::new("year"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                if arg(args, 0).is_null() {
                    return Ok(Value::Null);
                }
                Ok(Value::Integer(i64::from(date_arg(args, 0, "Year")?.year())))
            }),
        );
        map.insert(
            SmolStr::new("month"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                component(args, "Month", |datetime| datetime.month())
            }),
        );
        map.insert(
            SmolStr::new("day"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                component(args, "Day", |datetime| datetime.day())
            }),
        );
        map.insert(
            SmolStr::new("hour"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                component(args, "Hour", |datetime| datetime.hour())
            }),
        );
        map.insert(
            SmolStr::new("minute"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                component(args, "Minute", |datetime| datetime.minute())
            }),
        );
        map.insert(
            SmolStr::new("second"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                component(args, "Second", |datetime| datetime.second())
            }),
        );
        map.insert(
            SmolStr::new("weekday"),
            BuiltinFunction::new(ParamNum::Range(1, 2), |args| {
                let datetime = date_arg(args, 0, "Weekday")?;
                Ok(Value::Integer(weekday_number(
                    datetime.weekday(),
                    int_arg(args, 1, 1),
                )))
            }),
        );
        map.insert(
            SmolStr::new("weekdayname"),
            BuiltinFunction::new(ParamNum::Range(1, 3), |args| {
                let day = arg(args, 0).to_int();
                if !(1..=7).contains(&day) {
                    return Err(out_of_range("WeekdayName"));
                }
                let first_day = match int_arg(args, 2, 1) {
                    first_day @ 1..=7 => first_day,
                    _ => 1,
                };
                let index = usize::try_from((day - 1 + first_day - 1).rem_euclid(7)).unwrap_or(0);
                let name = WEEKDAY_NAMES[index];
                Ok(Value::from(if arg(args, 1).is_truthy() {
                    &name[..3]
                } else {
                    name
                }))
            }),
        );
        map.insert(
            SmolStr::new("monthname"),
            BuiltinFunction::new(ParamNum::Range(1, 2), |args| {
                let month = arg(args, 0).to_int();
                let name = usize::try_from(month - 1)
                    .ok()
                    .and_then(|index| MONTH_NAMES.get(index))
                    .ok_or_else(|| out_of_range("MonthName"))?;
                Ok(Value::from(if arg(args, 1).is_truthy() {
                    &name[..3]
                } else {
                    *name
                }))
            }),
        );
        map.insert(
            SmolStr::new("dateserial"),
            BuiltinFunction::new(ParamNum::Fixed(3), |args| {
                date_serial(
                    arg(args, 0).to_int(),
                    arg(args, 1).to_int(),
                    arg(args, 2).to_int(),
                )
                .map(date_value)
                .ok_or_else(|| out_of_range("DateSerial"))
            }),
        );
        map.insert(
            SmolStr::new("timeserial"),
            BuiltinFunction::new(ParamNum::Fixed(3), |args| {
                time_serial(
                    arg(args, 0).to_int(),
                    arg(args, 1).to_int(),
                    arg(args, 2).to_int(),
                )
                .map(date_value)
                .ok_or_else(|| out_of_range("TimeSerial"))
            }),
        );
        map.insert(
            SmolStr::new("dateadd"),
            BuiltinFunction::new(ParamNum::Fixed(3), |args| {
                let interval = interval_arg(args, "DateAdd")?;
                let datetime = date_arg(args, 2, "DateAdd")?;
                date_add(&interval, arg(args, 1).to_int(), datetime)
                    .map(date_value)
                    .ok_or_else(|| out_of_range("DateAdd"))
            }),
        );
        map.insert(
            SmolStr::new("datediff"),
            BuiltinFunction::new(ParamNum::Range(3, 5), |args| {
                let interval = interval_arg(args, "DateDiff")?;
                let from = date_arg(args, 1, "DateDiff")?;
                let to = date_arg(args, 2, "DateDiff")?;
                date_diff(&interval, from, to)
                    .map(Value::Integer)
                    .ok_or_else(|| out_of_range("DateDiff"))
            }),
        );
        map.insert(
            SmolStr::new("datepart"),
            BuiltinFunction::new(ParamNum::Range(2, 4), |args| {
                let interval = interval_arg(args, "DatePart")?;
                let datetime = date_arg(args, 1, "DatePart")?;
                date_part(&interval, datetime)
                    .map(Value::Integer)
                    .ok_or_else(|| out_of_range("DatePart"))
            }),
        );
        map.insert(
            SmolStr::new("isdate"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                Ok(Value::Bool(matches!(arg(args, 0), Value::String(s) if parse_datetime(s).is_some())))
            }),
        );
        map.insert(
            SmolStr::new("formatdatetime"),
            BuiltinFunction::new(ParamNum::Range(1, 2), |args| {
                let datetime = date_arg(args, 0, "FormatDateTime")?;
                Ok(Value::String(match int_arg(args, 1, 0) {
                    0 => format_datetime(datetime),
                    1 => format!(
                        "{}, {} {}, {}",
                        WEEKDAY_NAMES[datetime.weekday().num_days_from_sunday() as usize],
                        MONTH_NAMES[datetime.month0() as usize],
                        datetime.day(),
                        datetime.year()
                    ),
                    2 => format_date(datetime.date()),
                    3 => format_time(datetime.time()),
                    4 => format!("{:02}:{:02}", datetime.hour(), datetime.minute()),
                    _ => return Err(out_of_range("FormatDateTime")),
                }))
            }),
        );
        map.insert(
            SmolStr::new("cdate"),
            BuiltinFunction::new(ParamNum::Fixed(1), |args| {
                Ok(date_value(date_arg(args, 0, "CDate")?))
            }),
        );

        map
    });

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn call(name: &str, args: &[Value]) -> Result<Value, EvalError> {
        DateTimeFunctions
            .call(name, args)
            .map(Option::unwrap_or_default)
    }

    #[rstest]
    #[case::us_with_time("1/2/2024 3:04:05 PM", "1/2/2024 3:04:05 PM")]
    #[case::date_only("12/25/2023", "12/25/2023")]
    #[case::iso("2024-03-09 07:08:09", "3/9/2024 7:08:09 AM")]
    #[case::time_only("13:30", "1:30:00 PM")]
    #[case::long("January 5, 2021", "1/5/2021")]
    fn test_parse_and_format(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(
            parse_datetime(input).map(format_datetime),
            Some(expected.to_string())
        );
    }

    #[rstest]
    #[case::year("year", 2024)]
    #[case::month("month", 2)]
    #[case::day("day", 29)]
    #[case::hour("hour", 23)]
    #[case::minute("minute", 59)]
    #[case::second("second", 58)]
    #[case::weekday("weekday", 5)]
    fn test_components(#[case] name: &str, #[case] expected: i64) {
        assert_eq!(
            call(name, &[Value::from("2/29/2024 11:59:58 PM")]),
            Ok(Value::from(expected))
        );
    }

    #[rstest]
    #[case::months("m", 1, "1/31/2024", "2/29/2024")]
    #[case::years("yyyy", -1, "2/29/2024", "2/28/2023")]
    #[case::days("d", 2, "12/31/2023", "1/2/2024")]
    #[case::hours("h", 25, "1/1/2024", "1/2/2024 1:00:00 AM")]
    #[case::quarters("q", 1, "11/15/2023", "2/15/2024")]
    fn test_date_add(
        #[case] interval: &str,
        #[case] amount: i64,
        #[case] date: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(
            call(
                "dateadd",
                &[Value::from(interval), Value::from(amount), Value::from(date)]
            ),
            Ok(Value::from(expected))
        );
    }

    #[rstest]
    #[case::days("d", "1/1/2024", "3/1/2024", 60)]
    #[case::months("m", "12/31/2023", "1/1/2024", 1)]
    #[case::years("yyyy", "12/31/2023", "1/1/2024", 1)]
    #[case::hours("h", "1/1/2024 10:59:00 AM", "1/1/2024 11:00:00 AM", 1)]
    #[case::backwards("d", "1/10/2024", "1/1/2024", -9)]
    fn test_date_diff(
        #[case] interval: &str,
        #[case] from: &str,
        #[case] to: &str,
        #[case] expected: i64,
    ) {
        assert_eq!(
            call(
                "datediff",
                &[Value::from(interval), Value::from(from), Value::from(to)]
            ),
            Ok(Value::from(expected))
        );
    }

    #[test]
    fn test_serials_normalize_overflow() {
        assert_eq!(
            call("dateserial", &[Value::from(2023), Value::from(13), Value::from(1)]),
            Ok(Value::from("1/1/2024"))
        );
        assert_eq!(
            call("dateserial", &[Value::from(2024), Value::from(3), Value::from(0)]),
            Ok(Value::from("2/29/2024"))
        );
        assert_eq!(
            call("timeserial", &[Value::from(14), Value::from(5), Value::from(0)]),
            Ok(Value::from("2:05:00 PM"))
        );
    }

    #[test]
    fn test_names_and_parts() {
        assert_eq!(call("monthname", &[Value::from(3)]), Ok(Value::from("March")));
        assert_eq!(
            call("monthname", &[Value::from(3), Value::TRUE]),
            Ok(Value::from("Mar"))
        );
        assert_eq!(call("weekdayname", &[Value::from(1)]), Ok(Value::from("Sunday")));
        assert_eq!(
            call("datepart", &[Value::from("q"), Value::from("8/1/2024")]),
            Ok(Value::from(3))
        );
        assert_eq!(
            call("datepart", &[Value::from("y"), Value::from("2/1/2024")]),
            Ok(Value::from(32))
        );
        assert!(call("monthname", &[Value::from(13)]).is_err());
    }

    #[test]
    fn test_is_date_and_cdate() {
        assert_eq!(call("isdate", &[Value::from("1/1/2024")]), Ok(Value::TRUE));
        assert_eq!(call("isdate", &[Value::from("soon")]), Ok(Value::FALSE));
        assert_eq!(call("isdate", &[Value::from(5)]), Ok(Value::FALSE));
        assert!(matches!(
            call("cdate", &[Value::from("nope")]),
            Err(EvalError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_format_date_time() {
        let date = Value::from("7/4/2024 6:05:00 PM");
        assert_eq!(
            call("formatdatetime", &[date.clone(), Value::from(1)]),
            Ok(Value::from("Thursday, July 4, 2024"))
        );
        assert_eq!(
            call("formatdatetime", &[date.clone(), Value::from(2)]),
            Ok(Value::from("7/4/2024"))
        );
        assert_eq!(
            call("formatdatetime", &[date, Value::from(4)]),
            Ok(Value::from("18:05"))
        );
    }

    #[test]
    fn test_now_is_a_date() {
        let now = call("now", &[]).unwrap();
        assert!(parse_datetime(&now.to_string()).is_some());
        assert!(matches!(call("timer", &[]), Ok(Value::Float(_))));
    }
}

/// Market session and timing utilities
use chrono::{DateTime, Datelike, TimeZone, Utc};
use chrono_tz::Asia::Kolkata;

/// Check if today is a trading day (simplified - doesn't check holidays)
pub fn is_trading_day(date: DateTime<Utc>) -> bool {
    let date_ist = date.with_timezone(&Kolkata);
    let weekday = date_ist.weekday();
    
    // Monday = 0, Saturday = 5, Sunday = 6
    let day_num = weekday.num_days_from_monday();
    day_num < 5 // Monday to Friday only
}

/// Get market timings for today
pub fn get_market_timings(date: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let date_ist = date.with_timezone(&Kolkata);
    
    // Market open: 9:15 AM IST
    let market_open = Kolkata
        .with_ymd_and_hms(
            date_ist.year(),
            date_ist.month(),
            date_ist.day(),
            9,
            15,
            0,
        )
        .unwrap()
        .with_timezone(&Utc);
    
    // Market close: 3:30 PM IST
    let market_close = Kolkata
        .with_ymd_and_hms(
            date_ist.year(),
            date_ist.month(),
            date_ist.day(),
            15,
            30,
            0,
        )
        .unwrap()
        .with_timezone(&Utc);
    
    (market_open, market_close)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    fn utc_at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap(),
        )
    }

    #[test]
    fn weekday_is_trading_day() {
        // 2026-07-27 is a Monday in IST.
        assert!(is_trading_day(utc_at(2026, 7, 27, 4, 0)));
    }

    #[test]
    fn weekend_is_not_trading_day() {
        // 2026-08-01 is a Saturday in IST.
        assert!(!is_trading_day(utc_at(2026, 8, 1, 4, 0)));
    }

    #[test]
    fn market_timings_are_nine_fifteen_to_three_thirty_ist() {
        let (open, close) = get_market_timings(utc_at(2026, 7, 27, 4, 0));
        let open_ist = open.with_timezone(&Kolkata);
        let close_ist = close.with_timezone(&Kolkata);
        assert_eq!((open_ist.hour(), open_ist.minute()), (9, 15));
        assert_eq!((close_ist.hour(), close_ist.minute()), (15, 30));
    }
}

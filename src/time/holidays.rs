/// Exchange trading calendar: weekends plus configured holidays
use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct MarketCalendar {
    holidays: HashSet<NaiveDate>,
}

impl MarketCalendar {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        MarketCalendar {
            holidays: holidays.into_iter().collect(),
        }
    }

    /// Check if a date is a trading day (not weekend, not holiday)
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        let weekday = date.weekday();
        if weekday == Weekday::Sat || weekday == Weekday::Sun {
            return false;
        }
        !self.holidays.contains(&date)
    }

    pub fn holiday_count(&self) -> usize {
        self.holidays.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_holiday() {
        let republic_day = NaiveDate::from_ymd_opt(2026, 1, 26).unwrap(); // Monday
        let calendar = MarketCalendar::new([republic_day]);
        assert!(!calendar.is_trading_day(republic_day));
        assert_eq!(calendar.holiday_count(), 1);
    }

    #[test]
    fn test_weekend() {
        let calendar = MarketCalendar::default();
        let sat = NaiveDate::from_ymd_opt(2025, 1, 4).unwrap();
        let sun = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        assert!(!calendar.is_trading_day(sat));
        assert!(!calendar.is_trading_day(sun));
    }

    #[test]
    fn test_regular_weekday() {
        let calendar = MarketCalendar::default();
        let mon = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        assert!(calendar.is_trading_day(mon));
    }
}

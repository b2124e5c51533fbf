pub mod clock;
pub mod session;
pub mod holidays;

pub use clock::{Clock, ManualClock, SystemClock};
pub use session::{
    floor_to_minute, is_after_close, is_aggregation_window, is_market_open,
    is_within_tick_window, ist_date, minute_of_day, second_of_minute,
};
pub use holidays::MarketCalendar;

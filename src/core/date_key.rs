use chrono::{DateTime, Days, Local, NaiveDate};
use parking_lot::Mutex;

/// Source of "now" for day partitioning.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Local>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Clock pinned to a settable instant.
pub struct FixedClock {
    now: Mutex<DateTime<Local>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Local>) {
        *self.now.lock() = now;
    }

    pub fn advance_days(&self, days: u64) {
        let mut now = self.now.lock();
        if let Some(next) = now.checked_add_days(Days::new(days)) {
            *now = next;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock()
    }
}

/// Formats a day partition as `YYYY-MM-DD`. Lexicographic order matches date order,
/// which the range predicates in the store rely on.
pub fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

pub fn parse_day_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key.trim(), "%Y-%m-%d").ok()
}

/// First day that survives retention cleanup.
pub fn retention_cutoff(today: NaiveDate, retain_days: u32) -> NaiveDate {
    today
        .checked_sub_days(Days::new(u64::from(retain_days)))
        .unwrap_or(NaiveDate::MIN)
}

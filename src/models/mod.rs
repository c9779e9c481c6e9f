pub mod key_event;
pub mod settings;
pub mod statistics;

pub use key_event::{KeyCode, KeyEvent, RawKeyEvent};
pub use settings::Settings;
pub use statistics::{KeyCountRecord, KeyStat, StatsSnapshot, TimeRange};

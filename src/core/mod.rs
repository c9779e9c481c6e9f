pub mod app_log;
pub mod date_key;
pub mod event_tap;
pub mod key_codes;
pub mod keyboard_layout;
pub mod macos_event_tap;
pub mod macos_permissions;
pub mod persistence;
pub mod presenter;
pub mod stats_db;

pub use event_tap::{EventTap, InputListenerError, InputListenerErrorCode};
pub use presenter::StatsPresenter;
pub use stats_db::StatsStore;

use super::statistics::TimeRange;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Overrides the platform data directory (`~/Library/Application Support/KeyCount`).
    pub data_dir: Option<PathBuf>,
    pub database_file: String,
    /// Days of history kept by retention cleanup. `None` keeps everything.
    pub retain_days: Option<u32>,
    pub log_retain_days: usize,
    pub log_level: String,
    pub poll_interval_ms: u64,
    pub queue_capacity: usize,
    pub default_range: TimeRange,
    pub top_n: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: None,
            database_file: "keycount.sqlite".to_string(),
            retain_days: Some(365),
            log_retain_days: 7,
            log_level: "info".to_string(),
            poll_interval_ms: 1_000,
            queue_capacity: 1_024,
            default_range: TimeRange::Today,
            top_n: Some(20),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database_path(&self, data_dir: &std::path::Path) -> PathBuf {
        data_dir.join(&self.database_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "retain_days": 30, "default_range": "all_time" }"#)
                .expect("deserialize");
        assert_eq!(settings.retain_days, Some(30));
        assert_eq!(settings.default_range, TimeRange::AllTime);
        assert_eq!(settings.poll_interval_ms, 1_000);
        assert_eq!(settings.database_file, "keycount.sqlite");
        assert_eq!(settings.top_n, Some(20));
    }

    #[test]
    fn null_retain_days_disables_cleanup() {
        let settings: Settings =
            serde_json::from_str(r#"{ "retain_days": null }"#).expect("deserialize");
        assert_eq!(settings.retain_days, None);
    }
}

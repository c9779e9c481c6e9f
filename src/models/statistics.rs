use super::key_event::KeyCode;
use chrono::{DateTime, Local, NaiveDate};
use serde::de;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    #[default]
    Today,
    AllTime,
}

impl<'de> Deserialize<'de> for TimeRange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "today" => Ok(Self::Today),
            "all_time" | "allTime" => Ok(Self::AllTime),
            _ => Err(de::Error::custom(format!("invalid time range: {}", raw))),
        }
    }
}

/// One row of the `key_counts` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyCountRecord {
    pub key_code: KeyCode,
    pub day: NaiveDate,
    pub count: u64,
    pub last_updated: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStat {
    pub key_code: KeyCode,
    pub key_name: String,
    pub count: u64,
}

/// Display-ready view of the counters for one range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub range: TimeRange,
    #[serde(default)]
    pub entries: Vec<KeyStat>,
    #[serde(default)]
    pub total: u64,
}

impl StatsSnapshot {
    pub fn count_for(&self, key_code: KeyCode) -> u64 {
        self.entries
            .iter()
            .find(|e| e.key_code == key_code)
            .map(|e| e.count)
            .unwrap_or(0)
    }
}

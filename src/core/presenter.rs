use crate::core::key_codes;
use crate::core::stats_db::StatsStore;
use crate::models::{KeyCode, KeyStat, StatsSnapshot, TimeRange};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Joins stored counts with the known key list into a sorted snapshot.
///
/// Known keys keep their keyboard order on ties; counted keys outside the known list
/// follow, ordered by code. `total` covers the whole range, before filtering.
pub fn build_snapshot(
    range: TimeRange,
    counts: &HashMap<KeyCode, u64>,
    filter: Option<&str>,
    top_n: Option<usize>,
) -> StatsSnapshot {
    let known = key_codes::all_known_key_codes();
    let mut extra: Vec<KeyCode> = counts
        .keys()
        .copied()
        .filter(|code| !key_codes::is_known(*code))
        .collect();
    extra.sort_unstable();

    let needle = filter
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let mut entries: Vec<KeyStat> = known
        .into_iter()
        .chain(extra)
        .map(|key_code| KeyStat {
            key_code,
            key_name: key_codes::name_for(key_code),
            count: counts.get(&key_code).copied().unwrap_or(0),
        })
        .filter(|stat| match &needle {
            Some(q) => stat.key_name.to_lowercase().contains(q.as_str()),
            None => true,
        })
        .collect();

    // stable: ties keep keyboard order
    entries.sort_by(|a, b| b.count.cmp(&a.count));
    if let Some(n) = top_n {
        entries.truncate(n);
    }

    StatsSnapshot {
        range,
        entries,
        total: counts.values().fold(0u64, |acc, c| acc.saturating_add(*c)),
    }
}

/// Read-only adapter between the store and a statistics view.
#[derive(Clone)]
pub struct StatsPresenter {
    store: StatsStore,
    filter: Option<String>,
    top_n: Option<usize>,
}

impl StatsPresenter {
    pub fn new(store: StatsStore) -> Self {
        Self {
            store,
            filter: None,
            top_n: None,
        }
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_top_n(mut self, top_n: Option<usize>) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn snapshot(&self, range: TimeRange) -> StatsSnapshot {
        let counts = self.store.query(range);
        build_snapshot(range, &counts, self.filter.as_deref(), self.top_n)
    }

    /// Polls the store every `interval` and publishes changed snapshots.
    ///
    /// The task ends when `cancel` fires or every receiver has been dropped.
    pub fn spawn_polling(
        self,
        range: TimeRange,
        interval: Duration,
        cancel: CancellationToken,
    ) -> (watch::Receiver<StatsSnapshot>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(StatsSnapshot {
            range,
            ..StatsSnapshot::default()
        });

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {}
                }

                let presenter = self.clone();
                match tokio::task::spawn_blocking(move || presenter.snapshot(range)).await {
                    Ok(snapshot) => {
                        tx.send_if_modified(|current| {
                            if *current == snapshot {
                                return false;
                            }
                            *current = snapshot;
                            true
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "stats snapshot task failed"),
                }
            }
            tracing::debug!(?range, "stats polling stopped");
        });

        (rx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_count_known_keys_are_listed() {
        let snapshot = build_snapshot(TimeRange::Today, &HashMap::new(), None, None);
        assert_eq!(snapshot.entries.len(), key_codes::all_known_key_codes().len());
        assert!(snapshot.entries.iter().all(|e| e.count == 0));
        assert_eq!(snapshot.total, 0);
        // keyboard order preserved when everything ties
        assert_eq!(snapshot.entries[0].key_name, "1");
    }

    #[test]
    fn sorted_by_count_with_unknown_keys_included() {
        let counts = HashMap::from([(0, 3), (1, 1), (300, 2)]);
        let snapshot = build_snapshot(TimeRange::AllTime, &counts, None, Some(3));

        let got: Vec<(KeyCode, u64)> = snapshot
            .entries
            .iter()
            .map(|e| (e.key_code, e.count))
            .collect();
        assert_eq!(got, vec![(0, 3), (300, 2), (1, 1)]);
        assert_eq!(snapshot.entries[1].key_name, key_codes::name_for(300));
        assert_eq!(snapshot.total, 6);
    }

    #[test]
    fn filter_matches_names_case_insensitively() {
        let counts = HashMap::from([(56, 4), (60, 1), (0, 9)]);
        let snapshot = build_snapshot(TimeRange::Today, &counts, Some(" shift "), None);

        let names: Vec<&str> = snapshot.entries.iter().map(|e| e.key_name.as_str()).collect();
        assert_eq!(names, vec!["Shift", "Right Shift"]);
        assert_eq!(snapshot.total, 14);
    }

    #[test]
    fn presenter_reads_through_the_store() {
        let store = StatsStore::open_in_memory().expect("open");
        store.increment(0);
        store.increment(0);
        let snapshot = StatsPresenter::new(store)
            .with_top_n(Some(1))
            .snapshot(TimeRange::Today);
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.count_for(0), 2);
    }

    #[tokio::test]
    async fn polling_publishes_updates_until_cancelled() {
        let store = StatsStore::open_in_memory().expect("open");
        let cancel = CancellationToken::new();
        let (mut rx, handle) = StatsPresenter::new(store.clone()).spawn_polling(
            TimeRange::Today,
            Duration::from_millis(10),
            cancel.clone(),
        );

        store.increment(0);
        let wait = async {
            loop {
                rx.changed().await.expect("sender alive");
                if rx.borrow().count_for(0) == 1 {
                    break;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("snapshot published");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("poller stops")
            .expect("poller did not panic");
    }

    #[tokio::test]
    async fn polling_stops_when_the_view_goes_away() {
        let store = StatsStore::open_in_memory().expect("open");
        let (rx, handle) = StatsPresenter::new(store).spawn_polling(
            TimeRange::AllTime,
            Duration::from_millis(10),
            CancellationToken::new(),
        );

        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("poller stops")
            .expect("poller did not panic");
    }
}

//! Decides which movies each refresh phase should touch, and in what order.
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::models::{FetchTask, MovieSnapshot, SourceKind};

pub const DEFAULT_FRESHNESS_DAYS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Never fetched: the enrichment key is absent.
    New,
    Stale,
    Fresh,
}

fn older_than(last_updated: Option<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) -> bool {
    match last_updated {
        // Equal to the window is still fresh.
        Some(ts) => now.signed_duration_since(ts) > window,
        None => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StalenessScheduler {
    pub window: Duration,
    /// Cap on tasks per phase, applied after ordering.
    pub budget: Option<usize>,
}

impl Default for StalenessScheduler {
    fn default() -> Self {
        Self {
            window: Duration::days(DEFAULT_FRESHNESS_DAYS),
            budget: None,
        }
    }
}

impl StalenessScheduler {
    pub fn new(window: Duration, budget: Option<usize>) -> Self {
        Self { window, budget }
    }

    pub fn classify(&self, snap: &MovieSnapshot, now: DateTime<Utc>) -> Freshness {
        if !snap.has_tmdb_key {
            Freshness::New
        } else if older_than(snap.last_updated, now, self.window) {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }

    /// Image missing or empty, or the record is older than the window.
    pub fn needs_poster(&self, snap: &MovieSnapshot, now: DateTime<Utc>) -> bool {
        snap.image_url.as_deref().map_or(true, str::is_empty)
            || older_than(snap.last_updated, now, self.window)
    }

    fn cap(&self, mut tasks: Vec<FetchTask>) -> Vec<FetchTask> {
        if let Some(budget) = self.budget {
            tasks.truncate(budget);
        }
        tasks
    }

    /// New movies first, then stale ones oldest first (never-stamped leads).
    pub fn plan_detail(&self, snapshots: &[MovieSnapshot], now: DateTime<Utc>) -> Vec<FetchTask> {
        let mut new_ids = Vec::new();
        let mut stale: Vec<&MovieSnapshot> = Vec::new();
        let mut fresh = 0usize;
        for snap in snapshots {
            match self.classify(snap, now) {
                Freshness::New => new_ids.push(snap.movie_id.clone()),
                Freshness::Stale => stale.push(snap),
                Freshness::Fresh => fresh += 1,
            }
        }
        // None < Some(_), so unstamped records sort first.
        stale.sort_by_key(|s| s.last_updated);
        debug!(
            new = new_ids.len(),
            stale = stale.len(),
            fresh,
            "classified movies for detail refresh"
        );

        let tasks = new_ids
            .into_iter()
            .chain(stale.into_iter().map(|s| s.movie_id.clone()))
            .map(|id| FetchTask::new(id, SourceKind::Detail))
            .collect();
        self.cap(tasks)
    }

    pub fn plan_poster(&self, snapshots: &[MovieSnapshot], now: DateTime<Utc>) -> Vec<FetchTask> {
        let tasks = snapshots
            .iter()
            .filter(|s| self.needs_poster(s, now))
            .map(|s| FetchTask::new(s.movie_id.clone(), SourceKind::Poster))
            .collect();
        self.cap(tasks)
    }

    /// Movies with a usable TMDb id that have not been enriched yet.
    pub fn plan_enrichment(&self, snapshots: &[MovieSnapshot]) -> Vec<FetchTask> {
        let tasks = snapshots
            .iter()
            .filter(|s| !s.has_genres)
            .filter_map(|s| {
                let tmdb_id = s.tmdb_id.as_deref()?.trim();
                (!tmdb_id.is_empty()).then(|| FetchTask::enrichment(s.movie_id.clone(), tmdb_id))
            })
            .collect();
        self.cap(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn snap(id: &str, tmdb: Option<&str>, age_days: Option<i64>) -> MovieSnapshot {
        MovieSnapshot {
            movie_id: id.into(),
            has_tmdb_key: tmdb.is_some(),
            tmdb_id: tmdb.map(str::to_string),
            image_url: Some(format!("film-poster/{id}")),
            has_genres: false,
            last_updated: age_days.map(|d| now() - Duration::days(d)),
        }
    }

    #[test]
    fn missing_key_is_always_new() {
        let s = StalenessScheduler::default();
        assert_eq!(s.classify(&snap("a", None, Some(1)), now()), Freshness::New);
        assert_eq!(s.classify(&snap("b", None, Some(900)), now()), Freshness::New);
        assert_eq!(s.classify(&snap("c", None, None), now()), Freshness::New);
    }

    #[test]
    fn exact_window_is_not_stale() {
        let s = StalenessScheduler::default();
        let at_edge = snap("edge", Some("1"), Some(DEFAULT_FRESHNESS_DAYS));
        assert_eq!(s.classify(&at_edge, now()), Freshness::Fresh);

        let mut just_past = at_edge.clone();
        just_past.last_updated = just_past.last_updated.map(|t| t - Duration::seconds(1));
        assert_eq!(s.classify(&just_past, now()), Freshness::Stale);
    }

    #[test]
    fn empty_tmdb_id_still_counts_as_known() {
        let s = StalenessScheduler::default();
        assert_eq!(s.classify(&snap("x", Some(""), Some(3)), now()), Freshness::Fresh);
    }

    #[test]
    fn detail_plan_orders_new_then_oldest_stale() {
        let s = StalenessScheduler::default();
        let snaps = vec![
            snap("stale-70", Some("1"), Some(70)),
            snap("fresh", Some("2"), Some(5)),
            snap("new-a", None, None),
            snap("stale-200", Some("3"), Some(200)),
            snap("unstamped", Some("4"), None),
            snap("new-b", None, Some(1)),
        ];
        let ids: Vec<String> = s
            .plan_detail(&snaps, now())
            .into_iter()
            .map(|t| t.movie_id)
            .collect();
        assert_eq!(
            ids,
            vec!["new-a", "new-b", "unstamped", "stale-200", "stale-70"]
        );
    }

    #[test]
    fn budget_truncates_after_ordering() {
        let s = StalenessScheduler::new(Duration::days(60), Some(2));
        let snaps = vec![
            snap("stale", Some("1"), Some(100)),
            snap("new", None, None),
            snap("older", Some("2"), Some(300)),
        ];
        let ids: Vec<String> = s
            .plan_detail(&snaps, now())
            .into_iter()
            .map(|t| t.movie_id)
            .collect();
        assert_eq!(ids, vec!["new", "older"]);
    }

    #[test]
    fn poster_predicate() {
        let s = StalenessScheduler::default();
        let mut missing = snap("missing", Some("1"), Some(1));
        missing.image_url = None;
        let mut empty = snap("empty", Some("1"), Some(1));
        empty.image_url = Some(String::new());
        let old = snap("old", Some("1"), Some(61));
        let ok = snap("ok", Some("1"), Some(60));

        assert!(s.needs_poster(&missing, now()));
        assert!(s.needs_poster(&empty, now()));
        assert!(s.needs_poster(&old, now()));
        assert!(!s.needs_poster(&ok, now()));
    }

    #[test]
    fn enrichment_needs_nonempty_id_and_no_genres() {
        let s = StalenessScheduler::default();
        let mut enriched = snap("enriched", Some("10"), Some(1));
        enriched.has_genres = true;
        let snaps = vec![
            snap("todo", Some("603"), Some(1)),
            snap("blank", Some(""), Some(1)),
            snap("unknown", None, None),
            enriched,
        ];
        let plan = s.plan_enrichment(&snaps);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].movie_id, "todo");
        assert_eq!(plan[0].tmdb_id.as_deref(), Some("603"));
        assert_eq!(plan[0].source, SourceKind::Enrichment);
    }
}

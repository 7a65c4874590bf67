use chrono::{DateTime, Duration, TimeZone, Utc};

use pinswarm_protocol::{PeerId, SwarmId, UserId};
use pinswarm_state::uptime::*;

fn t(day: u32, h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, day, h, m, s).unwrap()
}

fn provider() -> (UserId, PeerId, SwarmId, UptimeKey) {
    let user = UserId::new("provider-1");
    let swarm = SwarmId::new("lab");
    let key = UptimeKey::new(user.clone(), swarm.clone());
    (user, PeerId::new("12D3KooWp1"), swarm, key)
}

fn bucket_sum(tracker: &UptimeTracker, key: &UptimeKey) -> (f64, f64) {
    tracker
        .daily_buckets(key)
        .iter()
        .fold((0.0, 0.0), |(on, off), b| (on + b.online_seconds, off + b.offline_seconds))
}

#[test]
fn test_register_opens_single_online_interval() {
    let tracker = UptimeTracker::new();
    let (user, peer, swarm, key) = provider();

    tracker.mark_online(&user, &peer, &[swarm.clone()], t(1, 10, 0, 0));
    tracker.mark_online(&user, &peer, &[swarm], t(1, 10, 5, 0));

    let open = tracker.open_interval(&key).unwrap();
    assert_eq!(open.state, UptimeState::Online);
    assert_eq!(open.start, t(1, 10, 0, 0), "re-registering must not reopen");
    assert!(open.end.is_none());
    assert!(tracker.closed_intervals(&key).is_empty());
    assert!(tracker.is_online(&user));
}

#[test]
fn test_closed_interval_buckets_match_wall_clock_across_midnight() {
    let tracker = UptimeTracker::new();
    let (user, peer, swarm, key) = provider();

    tracker.mark_online(&user, &peer, &[swarm], t(1, 23, 0, 0));
    tracker.mark_offline(&user, t(2, 1, 30, 15));

    let closed = tracker.closed_intervals(&key);
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].duration_seconds(), Some(9_015.0));

    let buckets = tracker.daily_buckets(&key);
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].online_seconds, 3_600.0);
    assert_eq!(buckets[1].online_seconds, 5_415.0);
    assert_eq!(bucket_sum(&tracker, &key).0, 9_015.0);
}

#[test]
fn test_watchdog_silence_causes_exactly_one_offline_transition() {
    let tracker = UptimeTracker::new();
    let (user, peer, swarm, key) = provider();
    let timeout = Duration::seconds(90);

    let registered = t(3, 12, 0, 0);
    tracker.mark_online(&user, &peer, &[swarm], registered);
    let last_activity = registered + Duration::seconds(10);
    tracker.record_activity(&user, last_activity);

    // Watchdog ticks every 30s; the silence only exceeds 90s on the 4th tick.
    let mut transitions = 0;
    for tick in 1..=6 {
        let now = last_activity + Duration::seconds(30 * tick);
        transitions += tracker.sweep(now, timeout).len();
        if tick < 4 {
            assert!(tracker.is_online(&user), "still online at tick {tick}");
        }
    }
    assert_eq!(transitions, 1);

    let closed = tracker.closed_intervals(&key);
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].state, UptimeState::Online);
    assert_eq!(closed[0].end, Some(last_activity));

    let open = tracker.open_interval(&key).unwrap();
    assert_eq!(open.state, UptimeState::Offline);
    assert_eq!(open.start, last_activity);
    assert!(open.end.is_none());
}

#[test]
fn test_activity_after_silence_reopens_online() {
    let tracker = UptimeTracker::new();
    let (user, peer, swarm, key) = provider();

    tracker.mark_online(&user, &peer, &[swarm], t(4, 8, 0, 0));
    tracker.sweep(t(4, 8, 5, 0), Duration::seconds(90));
    assert!(!tracker.is_online(&user));

    assert!(tracker.record_activity(&user, t(4, 8, 6, 0)));
    assert!(!tracker.record_activity(&user, t(4, 8, 7, 0)), "already online");

    let open = tracker.open_interval(&key).unwrap();
    assert_eq!(open.state, UptimeState::Online);
    assert_eq!(open.start, t(4, 8, 6, 0));

    let closed = tracker.closed_intervals(&key);
    assert_eq!(closed.len(), 2);
    // Intervals are contiguous and never overlap.
    assert_eq!(closed[0].end, Some(closed[1].start));
    assert_eq!(closed[1].end, Some(open.start));
}

#[test]
fn test_fold_accrues_without_double_counting() {
    let tracker = UptimeTracker::new();
    let (user, peer, swarm, key) = provider();
    let lookback = Duration::days(30);

    tracker.mark_online(&user, &peer, &[swarm], t(5, 10, 0, 0));
    tracker.record_activity(&user, t(5, 10, 10, 0));
    assert_eq!(tracker.fold_open(t(5, 10, 10, 0), lookback), 1);
    assert_eq!(bucket_sum(&tracker, &key).0, 600.0);
    assert!(tracker.open_interval(&key).is_some(), "fold must not close the interval");

    tracker.record_activity(&user, t(5, 10, 20, 0));
    tracker.fold_open(t(5, 10, 20, 0), lookback);
    assert_eq!(bucket_sum(&tracker, &key).0, 1_200.0);

    tracker.mark_offline(&user, t(5, 10, 25, 0));
    assert_eq!(bucket_sum(&tracker, &key).0, 1_500.0);

    let totals = tracker.totals(&key, 1, t(5, 10, 30, 0));
    assert_eq!(totals.online_seconds, 1_500.0);
    assert_eq!(totals.offline_seconds, 300.0);
}

#[test]
fn test_fold_does_not_count_online_time_past_last_activity() {
    let tracker = UptimeTracker::new();
    let (user, peer, swarm, key) = provider();

    tracker.mark_online(&user, &peer, &[swarm], t(6, 9, 0, 0));
    tracker.record_activity(&user, t(6, 9, 1, 0));
    tracker.fold_open(t(6, 9, 2, 30), Duration::days(30));
    assert_eq!(bucket_sum(&tracker, &key).0, 60.0);

    tracker.sweep(t(6, 9, 3, 0), Duration::seconds(90));
    tracker.mark_offline(&user, t(6, 9, 4, 0));
    tracker.fold_open(t(6, 9, 4, 0), Duration::days(30));

    let (online, offline) = bucket_sum(&tracker, &key);
    assert_eq!(online, 60.0);
    assert_eq!(offline, 180.0);
    assert_eq!(online + offline, 240.0, "observed wall clock from registration");
}

#[test]
fn test_fold_respects_lookback_horizon() {
    let tracker = UptimeTracker::new();
    let (user, peer, swarm, key) = provider();

    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    tracker.mark_online(&user, &peer, &[swarm], start);
    tracker.mark_offline(&user, start);
    let now = start + Duration::days(40);
    tracker.fold_open(now, Duration::days(30));

    let buckets = tracker.daily_buckets(&key);
    assert_eq!(buckets.len(), 30);
    assert_eq!(bucket_sum(&tracker, &key).1, 30.0 * 86_400.0);
}

#[test]
fn test_totals_window_excludes_old_days() {
    let tracker = UptimeTracker::new();
    let (user, peer, swarm, key) = provider();

    tracker.mark_online(&user, &peer, &[swarm.clone()], t(1, 0, 0, 0));
    tracker.mark_offline(&user, t(1, 1, 0, 0));
    tracker.mark_online(&user, &peer, &[swarm], t(10, 0, 0, 0));
    tracker.record_activity(&user, t(10, 2, 0, 0));

    // Only day 10 is inside a one-day window; its online interval is still open.
    let totals = tracker.totals(&key, 1, t(10, 2, 0, 0));
    assert_eq!(totals.online_seconds, 7_200.0);
    assert_eq!(totals.offline_seconds, 0.0);

    let wide = tracker.totals(&key, 30, t(10, 2, 0, 0));
    assert_eq!(wide.online_seconds, 3_600.0 + 7_200.0);
    assert_eq!(wide.offline_seconds, 9.0 * 86_400.0 - 3_600.0);
    assert!(wide.online_ratio().unwrap() < 0.1);
}

#[test]
fn test_totals_with_unbounded_window_covers_all_history() {
    let tracker = UptimeTracker::new();
    let (user, peer, swarm, key) = provider();

    tracker.mark_online(&user, &peer, &[swarm], t(1, 0, 0, 0));
    tracker.mark_offline(&user, t(1, 1, 0, 0));

    let month = tracker.totals(&key, 30, t(3, 0, 0, 0));
    let all = tracker.totals(&key, u32::MAX, t(3, 0, 0, 0));
    assert_eq!(all, month);
    assert_eq!(all.online_seconds, 3_600.0);
}

#[test]
fn test_leaving_swarm_closes_interval_and_stops_accrual() {
    let tracker = UptimeTracker::new();
    let (user, peer, swarm, key) = provider();
    let other = SwarmId::new("archive");
    let other_key = UptimeKey::new(user.clone(), other.clone());

    tracker.mark_online(&user, &peer, &[swarm.clone(), other], t(1, 10, 0, 0));
    assert!(tracker.leave_swarm(&user, &swarm, t(1, 11, 0, 0)));
    assert!(tracker.open_interval(&key).is_none());
    assert_eq!(tracker.closed_intervals(&key)[0].end, Some(t(1, 11, 0, 0)));

    // Later transitions only touch the swarms still tracked.
    tracker.mark_offline(&user, t(1, 12, 0, 0));
    tracker.record_activity(&user, t(1, 13, 0, 0));
    tracker.fold_open(t(1, 14, 0, 0), Duration::days(30));
    assert!(tracker.open_interval(&key).is_none());
    assert_eq!(tracker.open_interval(&other_key).unwrap().state, UptimeState::Online);

    let totals = tracker.totals(&key, 7, t(1, 15, 0, 0));
    assert_eq!(totals.online_seconds, 3_600.0);
    assert_eq!(totals.offline_seconds, 0.0);

    assert!(!tracker.leave_swarm(&user, &swarm, t(1, 16, 0, 0)));
}

#[test]
fn test_unknown_identity_is_ignored() {
    let tracker = UptimeTracker::new();
    let (user, _, _, key) = provider();
    assert!(!tracker.record_activity(&user, t(1, 0, 0, 0)));
    tracker.mark_offline(&user, t(1, 0, 0, 0));
    assert!(tracker.open_interval(&key).is_none());
    assert_eq!(tracker.totals(&key, 7, t(1, 0, 0, 0)), UptimeTotals::default());
}

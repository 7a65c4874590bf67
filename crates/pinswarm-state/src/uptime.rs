//! Online/offline uptime state machine with day-bucketed accounting.
//!
//! Every (user, swarm) pair has at most one open interval. A transition closes
//! the open interval, folds the part of it not yet accounted for into UTC daily
//! buckets, and opens a new interval in the other state. A periodic fold pass
//! accrues open intervals without closing them so long sessions still report
//! current totals; each open interval remembers how far it has been folded, so
//! no second is ever counted twice.
//!
//! Transitions for one user hold that user's presence entry for their whole
//! duration, so concurrent transitions for the same identity serialize while
//! different identities only contend on shared shards.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Days, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use pinswarm_protocol::{PeerId, SwarmId, UserId};

/// Liveness state of an identity within a swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UptimeState {
    Online,
    Offline,
}

impl std::fmt::Display for UptimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Online => "online",
            Self::Offline => "offline",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UptimeKey {
    pub user_id: UserId,
    pub swarm_id: SwarmId,
}

impl UptimeKey {
    pub fn new(user_id: UserId, swarm_id: SwarmId) -> Self {
        Self { user_id, swarm_id }
    }
}

/// A span of time spent in one state. `end` is `None` while the interval is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UptimeInterval {
    pub user_id: UserId,
    pub swarm_id: SwarmId,
    pub peer_id: PeerId,
    pub state: UptimeState,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl UptimeInterval {
    pub fn duration_seconds(&self) -> Option<f64> {
        self.end.map(|end| seconds_between(self.start, end))
    }
}

/// Accumulated seconds for one identity, swarm and UTC day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBucket {
    pub user_id: UserId,
    pub swarm_id: SwarmId,
    pub day: NaiveDate,
    pub online_seconds: f64,
    pub offline_seconds: f64,
}

impl DailyBucket {
    pub fn total_seconds(&self) -> f64 {
        self.online_seconds + self.offline_seconds
    }
}

/// Totals reported for a query window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UptimeTotals {
    pub online_seconds: f64,
    pub offline_seconds: f64,
}

impl UptimeTotals {
    /// Fraction of observed time spent online, `None` if nothing was observed.
    pub fn online_ratio(&self) -> Option<f64> {
        let total = self.online_seconds + self.offline_seconds;
        (total > 0.0).then(|| self.online_seconds / total)
    }

    fn add(&mut self, state: UptimeState, seconds: f64) {
        match state {
            UptimeState::Online => self.online_seconds += seconds,
            UptimeState::Offline => self.offline_seconds += seconds,
        }
    }
}

/// Split `[start, end)` at UTC midnights into per-day second counts.
pub fn split_by_utc_day(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<(NaiveDate, f64)> {
    let mut segments = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let day = cursor.date_naive();
        let next_midnight = day
            .succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc());
        let segment_end = match next_midnight {
            Some(midnight) if midnight < end => midnight,
            _ => end,
        };
        let secs = seconds_between(cursor, segment_end);
        if secs > 0.0 {
            segments.push((day, secs));
        }
        cursor = segment_end;
    }
    segments
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds().max(0) as f64 / 1000.0
}

#[derive(Debug, Clone)]
struct OpenInterval {
    interval: UptimeInterval,
    /// Everything before this instant is already in the daily buckets.
    folded_until: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Ledger {
    open: Option<OpenInterval>,
    closed: Vec<UptimeInterval>,
    buckets: BTreeMap<NaiveDate, DailyBucket>,
}

impl Ledger {
    fn accrue(&mut self, key: &UptimeKey, state: UptimeState, from: DateTime<Utc>, to: DateTime<Utc>) {
        for (day, secs) in split_by_utc_day(from, to) {
            let bucket = self.buckets.entry(day).or_insert_with(|| DailyBucket {
                user_id: key.user_id.clone(),
                swarm_id: key.swarm_id.clone(),
                day,
                online_seconds: 0.0,
                offline_seconds: 0.0,
            });
            match state {
                UptimeState::Online => bucket.online_seconds += secs,
                UptimeState::Offline => bucket.offline_seconds += secs,
            }
        }
    }

    /// Close the open interval at `at` (never before its start). Returns the
    /// closed interval and the instant up to which time is already accounted.
    fn close_open(&mut self, key: &UptimeKey, at: DateTime<Utc>) -> Option<(UptimeInterval, DateTime<Utc>)> {
        let open = self.open.take()?;
        let end = at.max(open.interval.start);
        if end > open.folded_until {
            self.accrue(key, open.interval.state, open.folded_until, end);
        }
        let mut interval = open.interval;
        interval.end = Some(end);
        self.closed.push(interval.clone());
        Some((interval, open.folded_until.max(end)))
    }

    fn transition(
        &mut self,
        key: &UptimeKey,
        peer_id: &PeerId,
        state: UptimeState,
        at: DateTime<Utc>,
    ) -> Option<Option<UptimeInterval>> {
        if matches!(&self.open, Some(open) if open.interval.state == state) {
            return None;
        }
        let (closed, start, accounted) = match self.close_open(key, at) {
            Some((interval, accounted)) => {
                let start = interval.end.unwrap_or(at);
                (Some(interval), start, accounted)
            }
            None => (None, at, at),
        };
        self.open = Some(OpenInterval {
            interval: UptimeInterval {
                user_id: key.user_id.clone(),
                swarm_id: key.swarm_id.clone(),
                peer_id: peer_id.clone(),
                state,
                start,
                end: None,
            },
            folded_until: accounted.max(start),
        });
        Some(closed)
    }
}

#[derive(Debug, Clone)]
struct Presence {
    peer_id: PeerId,
    swarms: Vec<SwarmId>,
    last_seen: DateTime<Utc>,
    online: bool,
}

/// Tracks online/offline intervals per (user, swarm).
#[derive(Default)]
pub struct UptimeTracker {
    ledgers: DashMap<UptimeKey, Ledger>,
    presence: DashMap<UserId, Presence>,
}

impl UptimeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registration: the identity is online in every listed swarm as of `now`.
    ///
    /// Swarms tracked for a previous registration but absent from `swarms`
    /// are moved offline.
    pub fn mark_online(&self, user_id: &UserId, peer_id: &PeerId, swarms: &[SwarmId], now: DateTime<Utc>) {
        let mut entry = self.presence.entry(user_id.clone()).or_insert_with(|| Presence {
            peer_id: peer_id.clone(),
            swarms: Vec::new(),
            last_seen: now,
            online: false,
        });
        let dropped: Vec<SwarmId> = entry
            .swarms
            .iter()
            .filter(|s| !swarms.contains(s))
            .cloned()
            .collect();
        for swarm_id in &dropped {
            self.transition(user_id, swarm_id, peer_id, UptimeState::Offline, now);
        }

        entry.peer_id = peer_id.clone();
        entry.swarms = swarms.to_vec();
        entry.last_seen = now;
        entry.online = true;
        for swarm_id in swarms {
            self.transition(user_id, swarm_id, peer_id, UptimeState::Online, now);
        }
    }

    /// Disconnect or watchdog timeout: the identity is offline as of `at`.
    pub fn mark_offline(&self, user_id: &UserId, at: DateTime<Utc>) {
        if let Some(mut entry) = self.presence.get_mut(user_id) {
            entry.online = false;
            let peer_id = entry.peer_id.clone();
            for swarm_id in entry.swarms.clone() {
                self.transition(user_id, &swarm_id, &peer_id, UptimeState::Offline, at);
            }
        }
    }

    /// Any traffic from the identity. Returns true if it came back online.
    pub fn record_activity(&self, user_id: &UserId, now: DateTime<Utc>) -> bool {
        let Some(mut entry) = self.presence.get_mut(user_id) else {
            return false;
        };
        if now > entry.last_seen {
            entry.last_seen = now;
        }
        if entry.online {
            return false;
        }
        entry.online = true;
        let peer_id = entry.peer_id.clone();
        for swarm_id in entry.swarms.clone() {
            self.transition(user_id, &swarm_id, &peer_id, UptimeState::Online, now);
        }
        tracing::info!(user_id = %user_id, "Silent provider resumed traffic; back online");
        true
    }

    /// Watchdog pass: force offline every online identity silent for longer
    /// than `timeout`. The offline interval starts at the last observed
    /// activity. Returns the identities that were transitioned.
    pub fn sweep(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<UserId> {
        let silent: Vec<UserId> = self
            .presence
            .iter()
            .filter(|p| p.online && now - p.last_seen > timeout)
            .map(|p| p.key().clone())
            .collect();

        let mut transitioned = Vec::new();
        for user_id in silent {
            let Some(mut entry) = self.presence.get_mut(&user_id) else {
                continue;
            };
            // Re-check under the entry lock; traffic may have arrived meanwhile.
            if !entry.online || now - entry.last_seen <= timeout {
                continue;
            }
            entry.online = false;
            let at = entry.last_seen;
            let peer_id = entry.peer_id.clone();
            for swarm_id in entry.swarms.clone() {
                self.transition(&user_id, &swarm_id, &peer_id, UptimeState::Offline, at);
            }
            tracing::info!(user_id = %user_id, last_seen = %at, "Heartbeat timeout; provider marked offline");
            transitioned.push(user_id.clone());
        }
        transitioned
    }

    /// Accrue every open interval into daily buckets without closing it.
    ///
    /// Online intervals are folded only up to the identity's last observed
    /// activity. Nothing older than `now - lookback` is accrued, and closed
    /// intervals that ended before that horizon are pruned.
    pub fn fold_open(&self, now: DateTime<Utc>, lookback: Duration) -> usize {
        let horizon = now - lookback;
        let last_seen: HashMap<UserId, DateTime<Utc>> = self
            .presence
            .iter()
            .map(|p| (p.key().clone(), p.last_seen))
            .collect();

        let mut folded = 0;
        for mut ledger in self.ledgers.iter_mut() {
            let key = ledger.key().clone();
            ledger.closed.retain(|i| i.end.map_or(true, |end| end >= horizon));

            let Some(open) = ledger.open.clone() else {
                continue;
            };
            let to = match open.interval.state {
                UptimeState::Online => last_seen.get(&key.user_id).copied().unwrap_or(now).min(now),
                UptimeState::Offline => now,
            };
            let from = open.folded_until.max(horizon);
            if to <= from {
                continue;
            }
            ledger.accrue(&key, open.interval.state, from, to);
            if let Some(open) = ledger.open.as_mut() {
                open.folded_until = to;
            }
            folded += 1;
        }
        tracing::debug!(folded, "Folded open uptime intervals into daily buckets");
        folded
    }

    /// Totals over the last `days` UTC calendar days including today: the
    /// daily buckets in the window plus the open interval's unfolded time.
    pub fn totals(&self, key: &UptimeKey, days: u32, now: DateTime<Utc>) -> UptimeTotals {
        let today = now.date_naive();
        let first_day = today
            .checked_sub_days(Days::new(u64::from(days.max(1)) - 1))
            .unwrap_or(NaiveDate::MIN);
        let window_start = first_day
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or(now);

        let mut totals = UptimeTotals::default();
        let Some(ledger) = self.ledgers.get(key) else {
            return totals;
        };
        for bucket in ledger.buckets.range(first_day..=today).map(|(_, b)| b) {
            totals.online_seconds += bucket.online_seconds;
            totals.offline_seconds += bucket.offline_seconds;
        }
        if let Some(open) = &ledger.open {
            let from = open.folded_until.max(open.interval.start).max(window_start);
            if now > from {
                totals.add(open.interval.state, seconds_between(from, now));
            }
        }
        totals
    }

    /// The identity left `swarm_id`: close its open interval there at `at`
    /// and stop tracking the swarm for later transitions. Returns true if an
    /// interval was open.
    pub fn leave_swarm(&self, user_id: &UserId, swarm_id: &SwarmId, at: DateTime<Utc>) -> bool {
        if let Some(mut entry) = self.presence.get_mut(user_id) {
            entry.swarms.retain(|s| s != swarm_id);
        }
        let key = UptimeKey::new(user_id.clone(), swarm_id.clone());
        let Some(mut ledger) = self.ledgers.get_mut(&key) else {
            return false;
        };
        let closed = ledger.close_open(&key, at);
        if let Some((interval, _)) = &closed {
            tracing::debug!(
                user_id = %user_id,
                swarm_id = %swarm_id,
                state = %interval.state,
                "Uptime interval closed on swarm departure"
            );
        }
        closed.is_some()
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.presence.get(user_id).map_or(false, |p| p.online)
    }

    pub fn last_seen(&self, user_id: &UserId) -> Option<DateTime<Utc>> {
        self.presence.get(user_id).map(|p| p.last_seen)
    }

    pub fn open_interval(&self, key: &UptimeKey) -> Option<UptimeInterval> {
        self.ledgers
            .get(key)
            .and_then(|l| l.open.as_ref().map(|o| o.interval.clone()))
    }

    pub fn closed_intervals(&self, key: &UptimeKey) -> Vec<UptimeInterval> {
        self.ledgers.get(key).map(|l| l.closed.clone()).unwrap_or_default()
    }

    pub fn daily_buckets(&self, key: &UptimeKey) -> Vec<DailyBucket> {
        self.ledgers
            .get(key)
            .map(|l| l.buckets.values().cloned().collect())
            .unwrap_or_default()
    }

    fn transition(
        &self,
        user_id: &UserId,
        swarm_id: &SwarmId,
        peer_id: &PeerId,
        state: UptimeState,
        at: DateTime<Utc>,
    ) {
        let key = UptimeKey::new(user_id.clone(), swarm_id.clone());
        let mut ledger = self.ledgers.entry(key.clone()).or_default();
        if let Some(closed) = ledger.transition(&key, peer_id, state, at) {
            tracing::debug!(
                user_id = %user_id,
                swarm_id = %swarm_id,
                state = %state,
                closed_state = ?closed.as_ref().map(|i| i.state),
                "Uptime transition"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, s).unwrap()
    }

    #[test]
    fn test_split_within_one_day() {
        let parts = split_by_utc_day(at(10, 0, 0), at(11, 30, 0));
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].1, 5_400.0);
    }

    #[test]
    fn test_split_across_midnight() {
        let start = at(23, 0, 0);
        let end = start + Duration::hours(26);
        let parts = split_by_utc_day(start, end);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].1, 3_600.0);
        assert_eq!(parts[1].1, 86_400.0);
        assert_eq!(parts[2].1, 3_600.0);
        let total: f64 = parts.iter().map(|(_, s)| s).sum();
        assert_eq!(total, 26.0 * 3_600.0);
    }

    #[test]
    fn test_split_empty_or_inverted() {
        assert!(split_by_utc_day(at(10, 0, 0), at(10, 0, 0)).is_empty());
        assert!(split_by_utc_day(at(11, 0, 0), at(10, 0, 0)).is_empty());
    }

    #[test]
    fn test_same_state_transition_is_noop() {
        let mut ledger = Ledger::default();
        let key = UptimeKey::new(UserId::new("u"), SwarmId::new("s"));
        let peer = PeerId::new("p");
        assert!(ledger.transition(&key, &peer, UptimeState::Online, at(1, 0, 0)).is_some());
        assert!(ledger.transition(&key, &peer, UptimeState::Online, at(2, 0, 0)).is_none());
        assert!(ledger.closed.is_empty());
    }
}

use crate::utils::time::local_day;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    End,
    Stop,
    Move,
}

impl EventKind {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::End => "end",
            EventKind::Stop => "stop",
            EventKind::Move => "move",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "start" => Some(EventKind::Start),
            "end" => Some(EventKind::End),
            "stop" => Some(EventKind::Stop),
            "move" => Some(EventKind::Move),
            _ => None,
        }
    }
}

/// One segment of a session timeline.
///
/// Anchors: a stop stores its centroid in `latitude/longitude`; a move stores
/// its start point there and its end point in `end_latitude/end_longitude`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEvent {
    /// `<session_id>:<ordinal>`, stable across replays.
    pub id: String,
    pub session_id: String,
    pub kind: EventKind,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub day: NaiveDate,
    pub latitude: f64,
    pub longitude: f64,
    pub end_latitude: Option<f64>,
    pub end_longitude: Option<f64>,
    pub distance_m: f64,
    pub point_count: u32,
    pub finalized: bool,
}

impl TimelineEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: &str,
        ordinal: u32,
        kind: EventKind,
        started_at: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
        offset: FixedOffset,
    ) -> Self {
        let mut ev = Self {
            id: format!("{session_id}:{ordinal}"),
            session_id: session_id.to_string(),
            kind,
            started_at,
            ended_at: started_at,
            duration_secs: 0,
            day: local_day(started_at, offset),
            latitude,
            longitude,
            end_latitude: None,
            end_longitude: None,
            distance_m: 0.0,
            point_count: 0,
            finalized: false,
        };
        ev.recompute_derived(offset);
        ev
    }

    /// The only place duration and calendar day are derived.
    pub fn recompute_derived(&mut self, offset: FixedOffset) {
        if self.ended_at < self.started_at {
            self.ended_at = self.started_at;
        }
        self.duration_secs = (self.ended_at - self.started_at).num_seconds();
        self.day = local_day(self.started_at, offset);
    }

    pub fn overlaps(&self, other: &TimelineEvent) -> bool {
        self.started_at < other.ended_at && other.started_at < self.ended_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::offset;
    use chrono::TimeZone;

    #[test]
    fn derived_fields_follow_end_time() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 23, 50, 0).unwrap();
        let mut ev = TimelineEvent::new("s", 3, EventKind::Stop, t0, 1.0, 2.0, offset(60));
        assert_eq!(ev.id, "s:3");
        assert_eq!(ev.day.to_string(), "2025-03-02");

        ev.ended_at = t0 + chrono::Duration::seconds(600);
        ev.recompute_derived(offset(60));
        assert_eq!(ev.duration_secs, 600);

        // end before start is clamped instead of producing a negative duration
        ev.ended_at = t0 - chrono::Duration::seconds(10);
        ev.recompute_derived(offset(60));
        assert_eq!(ev.duration_secs, 0);
    }

    #[test]
    fn touching_events_do_not_overlap() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let mut a = TimelineEvent::new("s", 1, EventKind::Move, t0, 0.0, 0.0, offset(0));
        a.ended_at = t0 + chrono::Duration::seconds(60);
        let mut b = TimelineEvent::new("s", 2, EventKind::Stop, a.ended_at, 0.0, 0.0, offset(0));
        b.ended_at = b.started_at + chrono::Duration::seconds(60);

        assert!(!a.overlaps(&b));
        b.started_at = t0 + chrono::Duration::seconds(30);
        assert!(a.overlaps(&b));
    }
}

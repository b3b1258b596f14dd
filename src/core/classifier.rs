//! Stop/move segment classifier.
//!
//! Consumes the accepted samples of one session in recorded order and keeps
//! a small state machine:
//!
//! ```text
//!             outside radius (commit pending distance)
//!           +-----------------------+
//!           v                       |
//!   MOVING --> CANDIDATE_STOP ------+
//!                  |  span >= min stop duration
//!                  v
//!               STOPPED --(first sample outside radius)--> CANDIDATE_STOP
//! ```
//!
//! The classifier is pure: it returns the events to upsert and the new
//! session distance, and the tracker persists them together with the sample.
//! Hops inside a candidate cluster are held back as pending distance; they
//! are committed to the move segment if the cluster breaks and dropped if it
//! becomes a stop, so the session total only ever grows.

use crate::config::ClassifierConfig;
use crate::core::geo::{Centroid, DistanceSum, GeoPoint, haversine_distance};
use crate::models::sample::{LocationSample, SegmentPhase};
use crate::models::timeline::{EventKind, TimelineEvent};
use chrono::{DateTime, FixedOffset, Utc};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Fix {
    point: GeoPoint,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Cluster {
    centroid: Centroid,
    first: Fix,
    last: Fix,
    count: u32,
    pending: DistanceSum,
}

impl Cluster {
    fn seed(fix: Fix) -> Self {
        Self {
            centroid: Centroid::starting_at(&fix.point),
            first: fix,
            last: fix,
            count: 1,
            pending: DistanceSum::default(),
        }
    }

    fn span_secs(&self) -> i64 {
        (self.last.at - self.first.at).num_seconds()
    }
}

#[derive(Debug, Clone)]
struct OpenStop {
    event: TimelineEvent,
    centroid: Centroid,
    last: Fix,
}

#[derive(Debug, Clone)]
struct OpenMove {
    event: TimelineEvent,
    distance: DistanceSum,
}

#[derive(Debug, Clone)]
enum Phase {
    Moving,
    CandidateStop(Cluster),
    Stopped(OpenStop),
}

/// Result of feeding one sample (or a closure) to the classifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifierOutput {
    /// Events to upsert, in the order they changed.
    pub upserts: Vec<TimelineEvent>,
    /// Session distance after this step (sum of move segments).
    pub session_distance_m: f64,
}

#[derive(Debug, Clone)]
pub struct Classifier {
    cfg: ClassifierConfig,
    offset: FixedOffset,
    session_id: String,
    next_ordinal: u32,
    start_event: Option<TimelineEvent>,
    phase: Phase,
    open_move: Option<OpenMove>,
    last: Option<Fix>,
    total: DistanceSum,
    closed: bool,
}

impl Classifier {
    /// A classifier for a freshly started session. The returned "start" event
    /// stays open until the first sample provides its coordinates.
    pub fn start(
        cfg: ClassifierConfig,
        offset: FixedOffset,
        session_id: &str,
        started_at: DateTime<Utc>,
    ) -> (Self, TimelineEvent) {
        let start = TimelineEvent::new(session_id, 0, EventKind::Start, started_at, 0.0, 0.0, offset);
        let classifier = Self {
            cfg,
            offset,
            session_id: session_id.to_string(),
            next_ordinal: 1,
            start_event: Some(start.clone()),
            phase: Phase::Moving,
            open_move: None,
            last: None,
            total: DistanceSum::default(),
            closed: false,
        };
        (classifier, start)
    }

    /// Rebuild the state of an active session from its stored samples.
    /// Event ids are deterministic, so re-upserting the output is harmless.
    pub fn replay(
        cfg: ClassifierConfig,
        offset: FixedOffset,
        session_id: &str,
        started_at: DateTime<Utc>,
        samples: &[LocationSample],
    ) -> (Self, Vec<TimelineEvent>) {
        let (mut classifier, start) = Self::start(cfg, offset, session_id, started_at);
        let mut events = vec![start];
        for s in samples {
            events.extend(classifier.ingest(s).upserts);
        }
        (classifier, events)
    }

    pub fn phase(&self) -> SegmentPhase {
        match self.phase {
            Phase::Moving => SegmentPhase::Moving,
            Phase::CandidateStop(_) => SegmentPhase::CandidateStop,
            Phase::Stopped(_) => SegmentPhase::Stopped,
        }
    }

    pub fn total_distance(&self) -> f64 {
        self.total.value()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn next_event(&mut self, kind: EventKind, at: DateTime<Utc>, point: GeoPoint) -> TimelineEvent {
        let ev = TimelineEvent::new(
            &self.session_id,
            self.next_ordinal,
            kind,
            at,
            point.latitude,
            point.longitude,
            self.offset,
        );
        self.next_ordinal += 1;
        ev
    }

    fn within_radius(&self, centroid: &Centroid, point: &GeoPoint) -> bool {
        centroid
            .center()
            .is_some_and(|c| haversine_distance(&c, point) <= self.cfg.stop_radius_m)
    }

    /// Extend (or open) the move segment up to `to`, committing `distance`.
    fn commit_move(&mut self, from: Fix, to: Fix, distance: f64, points: u32, out: &mut ClassifierOutput) {
        if self.open_move.is_none() {
            let mut event = self.next_event(EventKind::Move, from.at, from.point);
            event.point_count = 1;
            self.open_move = Some(OpenMove {
                event,
                distance: DistanceSum::default(),
            });
        }

        if let Some(mv) = self.open_move.as_mut() {
            mv.distance.add(distance);
            mv.event.distance_m = mv.distance.value();
            mv.event.ended_at = to.at;
            mv.event.end_latitude = Some(to.point.latitude);
            mv.event.end_longitude = Some(to.point.longitude);
            mv.event.point_count += points;
            mv.event.recompute_derived(self.offset);
            out.upserts.push(mv.event.clone());
        }
        self.total.add(distance);
    }

    fn finalize_move(&mut self, out: &mut ClassifierOutput) {
        if let Some(mut mv) = self.open_move.take() {
            mv.event.finalized = true;
            mv.event.recompute_derived(self.offset);
            out.upserts.push(mv.event);
        }
    }

    /// Feed the next accepted sample of the session.
    ///
    /// Samples not strictly after the previous one, and samples after the
    /// session was closed, are ignored.
    pub fn ingest(&mut self, sample: &LocationSample) -> ClassifierOutput {
        let mut out = ClassifierOutput {
            upserts: Vec::new(),
            session_distance_m: self.total.value(),
        };
        if self.closed {
            return out;
        }

        let fix = Fix {
            point: sample.point(),
            at: sample.recorded_at,
        };
        if self.last.is_some_and(|last| fix.at <= last.at) {
            log::debug!("classifier: ignoring out-of-order sample {}", sample.hash);
            return out;
        }
        let hop = self
            .last
            .map(|last| haversine_distance(&last.point, &fix.point))
            .unwrap_or(0.0);

        if let Some(mut start) = self.start_event.take() {
            start.latitude = fix.point.latitude;
            start.longitude = fix.point.longitude;
            start.finalized = true;
            out.upserts.push(start);
        }

        let phase = std::mem::replace(&mut self.phase, Phase::Moving);
        self.phase = match phase {
            Phase::Moving => Phase::CandidateStop(Cluster::seed(fix)),

            Phase::CandidateStop(mut cluster) => {
                if self.within_radius(&cluster.centroid, &fix.point) {
                    cluster.centroid.add(&fix.point);
                    cluster.pending.add(hop);
                    cluster.last = fix;
                    cluster.count += 1;

                    if cluster.span_secs() >= self.cfg.min_stop_duration_secs {
                        // pending jitter is dropped: stops carry no distance
                        self.finalize_move(&mut out);
                        let center = cluster.centroid.center().unwrap_or(cluster.first.point);
                        let mut stop = self.next_event(EventKind::Stop, cluster.first.at, center);
                        stop.ended_at = fix.at;
                        stop.point_count = cluster.count;
                        stop.recompute_derived(self.offset);
                        out.upserts.push(stop.clone());
                        Phase::Stopped(OpenStop {
                            event: stop,
                            centroid: cluster.centroid,
                            last: fix,
                        })
                    } else {
                        Phase::CandidateStop(cluster)
                    }
                } else {
                    let committed = cluster.pending.value() + hop;
                    self.commit_move(cluster.first, fix, committed, cluster.count, &mut out);
                    Phase::CandidateStop(Cluster::seed(fix))
                }
            }

            Phase::Stopped(mut stop) => {
                if self.within_radius(&stop.centroid, &fix.point) {
                    stop.centroid.add(&fix.point);
                    let center = stop.centroid.center().unwrap_or(fix.point);
                    stop.event.latitude = center.latitude;
                    stop.event.longitude = center.longitude;
                    stop.event.ended_at = fix.at;
                    stop.event.point_count += 1;
                    stop.event.recompute_derived(self.offset);
                    stop.last = fix;
                    out.upserts.push(stop.event.clone());
                    Phase::Stopped(stop)
                } else {
                    stop.event.finalized = true;
                    stop.event.recompute_derived(self.offset);
                    out.upserts.push(stop.event);
                    self.commit_move(stop.last, fix, hop, 1, &mut out);
                    Phase::CandidateStop(Cluster::seed(fix))
                }
            }
        };

        self.last = Some(fix);
        out.session_distance_m = self.total.value();
        out
    }

    /// Finalize everything at session end or forced closure.
    ///
    /// An open stop is closed at `at` (or the last sample, if later); an
    /// unconfirmed cluster's pending distance is committed as movement.
    pub fn close(&mut self, at: DateTime<Utc>) -> ClassifierOutput {
        let mut out = ClassifierOutput {
            upserts: Vec::new(),
            session_distance_m: self.total.value(),
        };
        if self.closed {
            return out;
        }
        let at = self.last.map_or(at, |last| at.max(last.at));

        if let Some(mut start) = self.start_event.take() {
            start.finalized = true;
            out.upserts.push(start);
        }

        match std::mem::replace(&mut self.phase, Phase::Moving) {
            Phase::Moving => {}
            Phase::CandidateStop(cluster) => {
                if cluster.count > 1 {
                    self.commit_move(
                        cluster.first,
                        cluster.last,
                        cluster.pending.value(),
                        cluster.count - 1,
                        &mut out,
                    );
                }
            }
            Phase::Stopped(mut stop) => {
                stop.event.ended_at = at;
                stop.event.finalized = true;
                stop.event.recompute_derived(self.offset);
                out.upserts.push(stop.event);
            }
        }
        self.finalize_move(&mut out);

        let anchor = self.last.map_or(GeoPoint::new(0.0, 0.0), |l| l.point);
        let mut end = self.next_event(EventKind::End, at, anchor);
        end.finalized = true;
        out.upserts.push(end);

        self.closed = true;
        out.session_distance_m = self.total.value();
        out
    }
}

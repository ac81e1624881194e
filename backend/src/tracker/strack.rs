use opencv::core::Rect;

use super::kalman_filter::KalmanXYAH;
use crate::{
    EntityClass,
    tracker::{Detection, tlwh_to_xyah},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackState {
    Tracked,
    Lost,
}

/// A single tracked object, following [STrack].
///
/// [STrack]: https://github.com/ultralytics/ultralytics/blob/004d9730060e560c86ad79aaa1ab97167443be25/ultralytics/trackers/byte_tracker.py#L16
#[derive(Debug, Clone)]
pub struct STrack {
    pub(super) track_id: u64,
    pub(super) frame_id: u64,
    pub(super) state: TrackState,
    pub(super) kalman: KalmanXYAH,
    pub(super) tlwh: [f32; 4],
    pub(super) class: EntityClass,
    score: f32,
}

impl STrack {
    pub fn new(detection: Detection) -> Self {
        let bbox = detection.bbox;
        let tlwh = [
            bbox.x as f32,
            bbox.y as f32,
            bbox.width as f32,
            bbox.height as f32,
        ];

        Self {
            track_id: 0,
            frame_id: 0,
            state: TrackState::Lost,
            kalman: KalmanXYAH::new(),
            tlwh,
            class: detection.class,
            score: detection.score,
        }
    }

    pub fn track_id(&self) -> u64 {
        self.track_id
    }

    pub fn class(&self) -> &EntityClass {
        &self.class
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub(super) fn activate(&mut self, track_id: u64, frame_id: u64) {
        self.track_id = track_id;
        self.frame_id = frame_id;
        self.state = TrackState::Tracked;

        let meas = tlwh_to_xyah(self.tlwh);
        self.kalman.initiate(meas);
    }

    pub(super) fn reactivate(&mut self, detection: &STrack, frame_id: u64) {
        self.update(detection, frame_id);
    }

    pub(super) fn predict(&mut self) {
        if self.state != TrackState::Tracked {
            self.kalman.mean[6] = 0.0;
            self.kalman.mean[7] = 0.0;
        }
        self.kalman.predict();
    }

    pub(super) fn update(&mut self, detection: &STrack, frame_id: u64) {
        self.frame_id = frame_id;
        self.tlwh = detection.tlwh;
        self.score = detection.score;
        self.state = TrackState::Tracked;

        let meas = tlwh_to_xyah(self.tlwh);
        self.kalman.update(meas);
    }

    pub(super) fn mark_lost(&mut self) {
        self.state = TrackState::Lost;
    }

    /// The last detected bounding box.
    pub fn rect(&self) -> Rect {
        tlwh_to_rect(self.tlwh)
    }

    pub(super) fn kalman_tlwh(&self) -> [f32; 4] {
        self.kalman.tlwh()
    }
}

fn tlwh_to_rect(tlwh: [f32; 4]) -> Rect {
    Rect::new(
        tlwh[0] as i32,
        tlwh[1] as i32,
        tlwh[2] as i32,
        tlwh[3] as i32,
    )
}

use anyhow::{Result, anyhow};
use lapjv::{Matrix, lapjv};

use crate::tracker::{
    Detection,
    strack::{STrack, TrackState},
    tlwh_to_xyah,
};

/// Cost assigned to pairs that must never be matched.
const FORBIDDEN_COST: f32 = 1e6;

/// A [BYTETracker] variant that only matches tracks to detections of the same class.
///
/// Identities are unique per tracker and start at 1.
///
/// [BYTETracker]: https://github.com/ultralytics/ultralytics/blob/004d9730060e560c86ad79aaa1ab97167443be25/ultralytics/trackers/byte_tracker.py#L231
#[derive(Debug)]
pub struct ByteTracker {
    tracked: Vec<STrack>,
    lost: Vec<STrack>,
    frame_id: u64,
    next_track_id: u64,
    max_time_lost: u64,
    match_threshold: f32,
}

impl ByteTracker {
    /// Creates a tracker keeping lost tracks for one second of `frame_rate` frames.
    ///
    /// Detections only continue a track when their IoU with it is at least `min_match_iou`.
    pub fn new(frame_rate: u32, min_match_iou: f32) -> Self {
        Self {
            tracked: Vec::new(),
            lost: Vec::new(),
            frame_id: 0,
            next_track_id: 1,
            max_time_lost: frame_rate.max(1) as u64,
            match_threshold: 1.0 - min_match_iou.clamp(0.0, 1.0),
        }
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// Advances one frame with `detections` and returns the currently tracked objects.
    pub fn update(&mut self, detections: Vec<Detection>) -> Result<Vec<STrack>> {
        self.frame_id += 1;

        // 1. Predict all tracks
        for track in &mut self.tracked {
            track.predict();
        }
        for track in &mut self.lost {
            track.predict();
        }

        // 2. Convert detections to STrack (unactivated)
        let detection_tracks: Vec<STrack> = detections
            .into_iter()
            .filter(|d| d.bbox.width > 0 && d.bbox.height > 0)
            .map(STrack::new)
            .collect();
        if self.tracked.is_empty() && self.lost.is_empty() {
            self.tracked = detection_tracks
                .into_iter()
                .map(|mut track| {
                    track.activate(self.allocate_track_id(), self.frame_id);
                    track
                })
                .collect();
            return Ok(self.tracked.clone());
        }

        // 3. Match `tracked` and `lost` to detections
        let mut current_tracks = Vec::new();
        current_tracks.append(&mut self.tracked);
        current_tracks.append(&mut self.lost);

        let cost = iou_distance(&current_tracks, &detection_tracks);
        let assignment = linear_assignment(&cost, self.match_threshold)?;

        let mut activated = Vec::new();
        let mut reactivated = Vec::new();
        let mut lost = Vec::new();

        // 4. Update matched tracks
        for (ci, di) in assignment.matches {
            let mut track = current_tracks[ci].clone();
            let det = &detection_tracks[di];

            if track.state == TrackState::Tracked {
                track.update(det, self.frame_id);
                activated.push(track);
            } else {
                track.reactivate(det, self.frame_id);
                reactivated.push(track);
            }
        }

        // 5. Unmatched tracks to `lost`
        for ci in assignment.unmatched_rows {
            let mut track = current_tracks[ci].clone();
            track.mark_lost();
            lost.push(track);
        }

        // 6. New tracks from unmatched detections
        for di in assignment.unmatched_columns {
            let mut track = detection_tracks[di].clone();
            track.activate(self.allocate_track_id(), self.frame_id);
            activated.push(track);
        }

        // 7. Update state lists
        self.tracked = activated;
        self.tracked.extend(reactivated);
        self.lost = lost
            .into_iter()
            .filter(|track| self.frame_id - track.frame_id <= self.max_time_lost)
            .collect();

        Ok(self.tracked.clone())
    }

    fn allocate_track_id(&mut self) -> u64 {
        let id = self.next_track_id;
        self.next_track_id += 1;
        id
    }
}

/// Intersection over union of two `[x, y, w, h]` boxes.
fn iou_tlwh(a: [f32; 4], b: [f32; 4]) -> f32 {
    let [ax, ay, aw, ah] = a;
    let [bx, by, bw, bh] = b;
    let overlap_w = ((ax + aw).min(bx + bw) - ax.max(bx)).max(0.0);
    let overlap_h = ((ay + ah).min(by + bh) - ay.max(by)).max(0.0);
    let intersection = overlap_w * overlap_h;

    intersection / (aw * ah + bw * bh - intersection + 1e-6)
}

/// Cost of matching each track (rows) to each detection (columns).
///
/// Pairs of different classes or outside the motion gate are forbidden.
fn iou_distance(tracks: &[STrack], detections: &[STrack]) -> Vec<Vec<f32>> {
    const GATING_THRESHOLD: f32 = 9.4877;

    tracks
        .iter()
        .map(|track| {
            detections
                .iter()
                .map(|detection| {
                    if track.class != detection.class
                        || track.kalman.gating_distance(tlwh_to_xyah(detection.tlwh))
                            > GATING_THRESHOLD
                    {
                        FORBIDDEN_COST
                    } else {
                        1.0 - iou_tlwh(track.kalman_tlwh(), detection.tlwh)
                    }
                })
                .collect()
        })
        .collect()
}

#[derive(Debug, Default, PartialEq)]
struct Assignment {
    /// `(row, column)` pairs with a cost within the threshold.
    matches: Vec<(usize, usize)>,
    unmatched_rows: Vec<usize>,
    unmatched_columns: Vec<usize>,
}

/// Solves the minimum cost assignment of rows to columns, keeping only pairs costing at most
/// `threshold`.
fn linear_assignment(costs: &[Vec<f32>], threshold: f32) -> Result<Assignment> {
    let rows = costs.len();
    let columns = costs.first().map_or(0, Vec::len);
    if rows == 0 || columns == 0 {
        return Ok(Assignment {
            matches: vec![],
            unmatched_rows: (0..rows).collect(),
            unmatched_columns: (0..columns).collect(),
        });
    }

    // lapjv needs a square matrix
    let n = rows.max(columns);
    let square = Matrix::from_shape_fn((n, n), |(i, j)| {
        if i < rows && j < columns {
            costs[i][j]
        } else {
            FORBIDDEN_COST
        }
    });
    let (row_to_column, _) =
        lapjv(&square).map_err(|err| anyhow!("linear assignment failed: {err:?}"))?;

    let mut assignment = Assignment::default();
    let mut column_matched = vec![false; columns];
    for (row, &column) in row_to_column.iter().enumerate().take(rows) {
        if column < columns && costs[row][column] <= threshold {
            assignment.matches.push((row, column));
            column_matched[column] = true;
        } else {
            assignment.unmatched_rows.push(row);
        }
    }
    assignment.unmatched_columns = column_matched
        .into_iter()
        .enumerate()
        .filter_map(|(column, matched)| (!matched).then_some(column))
        .collect();

    Ok(assignment)
}

#[cfg(test)]
mod tests {
    use opencv::core::Rect;

    use super::*;
    use crate::EntityClass;

    fn player(x: i32, y: i32) -> Detection {
        Detection::new(Rect::new(x, y, 20, 40), EntityClass::Player, 0.9)
    }

    fn ball(x: i32, y: i32) -> Detection {
        Detection::new(Rect::new(x, y, 20, 40), EntityClass::Ball, 0.9)
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = [0.0, 0.0, 10.0, 10.0];

        assert!((iou_tlwh(a, a) - 1.0).abs() < 1e-4);
        assert_eq!(iou_tlwh(a, [20.0, 20.0, 10.0, 10.0]), 0.0);
    }

    #[test]
    fn first_frame_activates_all_detections() {
        let mut tracker = ByteTracker::new(30, 0.5);
        let tracks = tracker
            .update(vec![player(10, 10), player(200, 10), ball(400, 10)])
            .unwrap();

        assert_eq!(tracker.frame_id(), 1);
        let ids = tracks.iter().map(STrack::track_id).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(tracks[2].class(), &EntityClass::Ball);
    }

    #[test]
    fn identities_persist_across_small_motion() {
        let mut tracker = ByteTracker::new(30, 0.5);
        tracker.update(vec![player(10, 10), player(200, 10)]).unwrap();

        let tracks = tracker
            .update(vec![player(202, 11), player(12, 10)])
            .unwrap();

        let mut by_position = tracks
            .iter()
            .map(|track| (track.rect().x, track.track_id()))
            .collect::<Vec<_>>();
        by_position.sort();
        assert_eq!(by_position, vec![(12, 1), (202, 2)]);
    }

    #[test]
    fn tracks_do_not_match_other_classes() {
        let mut tracker = ByteTracker::new(30, 0.5);
        tracker.update(vec![player(10, 10)]).unwrap();

        let tracks = tracker.update(vec![ball(10, 10)]).unwrap();

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].track_id(), 2);
        assert_eq!(tracks[0].class(), &EntityClass::Ball);
    }

    #[test]
    fn lost_track_is_reactivated_with_same_identity() {
        let mut tracker = ByteTracker::new(30, 0.5);
        tracker.update(vec![player(10, 10)]).unwrap();

        assert!(tracker.update(vec![]).unwrap().is_empty());
        let tracks = tracker.update(vec![player(10, 10)]).unwrap();

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].track_id(), 1);
    }

    #[test]
    fn lost_track_expires() {
        let mut tracker = ByteTracker::new(2, 0.5);
        tracker.update(vec![player(10, 10)]).unwrap();
        for _ in 0..4 {
            tracker.update(vec![]).unwrap();
        }

        let tracks = tracker.update(vec![player(10, 10)]).unwrap();

        assert_eq!(tracks[0].track_id(), 2);
    }

    #[test]
    fn empty_boxes_are_ignored() {
        let mut tracker = ByteTracker::new(30, 0.5);
        let tracks = tracker
            .update(vec![Detection::new(
                Rect::new(5, 5, 0, 10),
                EntityClass::Player,
                0.9,
            )])
            .unwrap();

        assert!(tracks.is_empty());
    }

    #[test]
    fn linear_assignment_respects_threshold() {
        let assignment =
            linear_assignment(&[vec![0.1, 0.9], vec![0.8, 0.95]], 0.5).unwrap();

        assert_eq!(assignment.matches, vec![(0, 0)]);
        assert_eq!(assignment.unmatched_rows, vec![1]);
        assert_eq!(assignment.unmatched_columns, vec![1]);
    }

    #[test]
    fn linear_assignment_handles_rectangular_costs() {
        let assignment = linear_assignment(&[vec![0.9, 0.2, 0.4]], 0.5).unwrap();

        assert_eq!(assignment.matches, vec![(0, 1)]);
        assert!(assignment.unmatched_rows.is_empty());
        assert_eq!(assignment.unmatched_columns, vec![0, 2]);

        let empty = linear_assignment(&[], 0.5).unwrap();
        assert_eq!(empty, Assignment::default());
    }
}

use std::{
    fs, iter,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};
use opencv::{
    core::{Mat, MatTraitConst, Point2d, Scalar, Size},
    imgproc::{LINE_8, rectangle},
};

use crate::{
    EntityClass, FrameTrackSet, Normalization, Settings, Team, TrackedEntity,
    detect::Detector,
    homography::{COURT_HEIGHT, COURT_WIDTH, Homography, compute_homography},
    tactical::{self, BLUE, GREEN, MapSize, RED, YELLOW},
    tracker::{ByteTracker, STrack, centroid},
    video::{FrameSink, VideoSink, VideoSource},
};

const ANNOTATION_THICKNESS: i32 = 2;

/// Outputs of a single processed video.
#[derive(Clone, PartialEq, Debug)]
pub struct VideoSummary {
    pub source: PathBuf,
    pub tracked: PathBuf,
    pub tactical: PathBuf,
    pub frames: usize,
}

/// Processes every `.mp4` video of `settings.data_dir` in path order.
///
/// A failing video is logged and skipped. Returns the summaries of the videos that succeeded.
pub fn run_batch(settings: &Settings, detector: &mut dyn Detector) -> Result<Vec<VideoSummary>> {
    for dir in [&settings.tracked_dir, &settings.tactical_dir] {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
    }

    let videos = find_videos(&settings.data_dir)?;
    if videos.is_empty() {
        warn!("no .mp4 videos found in {}", settings.data_dir.display());
    }

    let mut summaries = Vec::with_capacity(videos.len());
    for video in videos {
        match process_video(&video, settings, detector) {
            Ok(summary) => summaries.push(summary),
            Err(err) => error!("failed to process {}: {err:#}", video.display()),
        }
    }

    Ok(summaries)
}

/// Lists the `.mp4` files directly inside `dir`, sorted by path.
pub fn find_videos(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read directory {}", dir.display()))?;

    let mut videos = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_mp4 = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mp4"));
        if is_mp4 && path.is_file() {
            videos.push(path);
        }
    }
    videos.sort();

    Ok(videos)
}

/// Detects and tracks every frame of the video at `path`, writing the annotated video and then
/// the tactical map video.
///
/// Nothing is written when the homography for the video's frame size cannot be computed.
pub fn process_video(
    path: &Path,
    settings: &Settings,
    detector: &mut dyn Detector,
) -> Result<VideoSummary> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| anyhow!("invalid video name {}", path.display()))?;
    let mut source = VideoSource::open(path)?;
    let fps = source.fps();
    let size = source.size();
    info!(
        "processing {} ({}x{} at {fps} fps)",
        path.display(),
        size.width,
        size.height
    );

    let homography = compute_homography(size.width, size.height)?;
    let tracked = settings.tracked_dir.join(format!("{stem}_tracked.mp4"));
    let tactical = settings.tactical_dir.join(format!("{stem}_tactical.mp4"));

    let mut processor = FrameProcessor {
        detector,
        tracker: ByteTracker::new(fps.round() as u32, settings.min_match_iou),
        homography,
        normalization: settings.normalization,
        size,
    };
    let mut sink = VideoSink::create(&tracked, size, fps)?;
    let frames = iter::from_fn(|| source.next_frame().transpose());
    let result = track_frames(frames, &mut processor, &mut sink, settings.progress_interval);
    sink.release()?;

    let tracks = result?;
    info!(
        "annotated video saved to {} ({} frames)",
        tracked.display(),
        tracks.len()
    );

    let map_size = MapSize::new(settings.map_width, settings.map_height);
    let frames = tactical::generate_tactical_map(&tracks, &tactical, fps, map_size)?;
    info!("finished {} with {frames} frames", path.display());

    Ok(VideoSummary {
        source: path.to_path_buf(),
        tracked,
        tactical,
        frames,
    })
}

/// Per video detection and tracking state.
#[derive(Debug)]
struct FrameProcessor<'a> {
    detector: &'a mut dyn Detector,
    tracker: ByteTracker,
    homography: Homography,
    normalization: Normalization,
    size: Size,
}

impl FrameProcessor<'_> {
    /// Detects and tracks entities on `frame` and draws their boxes onto it.
    fn process(&mut self, frame: &mut Mat) -> Result<Vec<TrackedEntity>> {
        let detections = self.detector.detect(frame)?;
        let tracks = self.tracker.update(detections)?;
        annotate(frame, &tracks)?;

        Ok(entities_from_tracks(
            &tracks,
            self.size,
            &self.homography,
            self.normalization,
        ))
    }
}

fn track_frames(
    frames: impl Iterator<Item = Result<Mat>>,
    processor: &mut FrameProcessor<'_>,
    sink: &mut impl FrameSink,
    progress_interval: u64,
) -> Result<FrameTrackSet> {
    let mut tracks = FrameTrackSet::new();
    for (index, frame) in frames.enumerate() {
        let index = index as u64;
        let mut frame = frame?;
        let entities = processor.process(&mut frame)?;
        sink.write(&frame)?;
        tracks.insert(index, entities);

        if progress_interval > 0 && index % progress_interval == 0 {
            info!("processed frame {index}");
        }
    }

    Ok(tracks)
}

/// Maps a pixel centroid into court fractions.
pub fn normalize(
    center: Point2d,
    size: Size,
    homography: &Homography,
    normalization: Normalization,
) -> Point2d {
    match normalization {
        Normalization::Frame => Point2d::new(
            center.x / size.width as f64,
            center.y / size.height as f64,
        ),
        Normalization::Court => {
            let projected = homography.project_point(center);
            Point2d::new(projected.x / COURT_WIDTH, projected.y / COURT_HEIGHT)
        }
    }
}

/// Converts the tracks of one frame into entities in court fractions.
pub fn entities_from_tracks(
    tracks: &[STrack],
    size: Size,
    homography: &Homography,
    normalization: Normalization,
) -> Vec<TrackedEntity> {
    tracks
        .iter()
        .map(|track| {
            let center = centroid(track.rect());
            let position = normalize(center, size, homography, normalization);
            let entity = match track.class() {
                EntityClass::Player => TrackedEntity::player(team_of(track, size.width), position),
                class => TrackedEntity::new(class.clone(), position),
            };
            entity.with_identity(Some(track.track_id()))
        })
        .collect()
}

fn team_of(track: &STrack, frame_width: i32) -> Option<Team> {
    (track.class() == &EntityClass::Player)
        .then(|| Team::from_half_plane(centroid(track.rect()).x, frame_width))
}

fn annotation_color(track: &STrack, frame_width: i32) -> Scalar {
    match (track.class(), team_of(track, frame_width)) {
        (EntityClass::Player, Some(Team::Home)) => RED,
        (EntityClass::Player, _) => BLUE,
        (EntityClass::Ball, _) => YELLOW,
        _ => GREEN,
    }
}

/// Draws the last detected box of each track onto `frame`.
pub fn annotate(frame: &mut Mat, tracks: &[STrack]) -> Result<()> {
    let width = frame.cols();
    for track in tracks {
        rectangle(
            frame,
            track.rect(),
            annotation_color(track, width),
            ANNOTATION_THICKNESS,
            LINE_8,
            0,
        )?;
    }
    Ok(())
}

use std::path::Path;

use anyhow::{Result, bail};
use log::info;
use opencv::{
    core::{CV_8UC3, Mat, Point, Point2d, Scalar, Size, VecN},
    imgproc::{FILLED, LINE_8, circle, line},
};

use crate::{
    EntityClass, FrameTrackSet, Team, TrackedEntity,
    video::{FrameSink, VideoSink},
};

pub const DEFAULT_MAP_WIDTH: i32 = 640;
pub const DEFAULT_MAP_HEIGHT: i32 = 360;

const CENTER_LINE_THICKNESS: i32 = 2;

/// Colors are BGR.
pub(crate) const RED: Scalar = VecN([0.0, 0.0, 255.0, 0.0]);
pub(crate) const BLUE: Scalar = VecN([255.0, 0.0, 0.0, 0.0]);
pub(crate) const YELLOW: Scalar = VecN([0.0, 255.0, 255.0, 0.0]);
pub(crate) const GREEN: Scalar = VecN([0.0, 255.0, 0.0, 0.0]);
const GRAY: Scalar = VecN([128.0, 128.0, 128.0, 0.0]);
const WHITE: Scalar = VecN([255.0, 255.0, 255.0, 0.0]);

/// The color and radius an entity is drawn with.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct MarkerStyle {
    pub color: Scalar,
    pub radius: i32,
}

pub const HOME_PLAYER_STYLE: MarkerStyle = MarkerStyle {
    color: RED,
    radius: 6,
};

pub const AWAY_PLAYER_STYLE: MarkerStyle = MarkerStyle {
    color: BLUE,
    radius: 6,
};

/// A player without a team is drawn exactly like an away player.
pub const PLAYER_UNSET_TEAM_STYLE: MarkerStyle = AWAY_PLAYER_STYLE;

pub const BALL_STYLE: MarkerStyle = MarkerStyle {
    color: YELLOW,
    radius: 8,
};

pub const REFEREE_STYLE: MarkerStyle = MarkerStyle {
    color: GREEN,
    radius: 7,
};

pub const OTHER_STYLE: MarkerStyle = MarkerStyle {
    color: GRAY,
    radius: 5,
};

impl MarkerStyle {
    pub fn for_entity(entity: &TrackedEntity) -> MarkerStyle {
        match (&entity.class, entity.team()) {
            (EntityClass::Player, Some(Team::Home)) => HOME_PLAYER_STYLE,
            (EntityClass::Player, Some(Team::Away)) => AWAY_PLAYER_STYLE,
            (EntityClass::Player, None) => PLAYER_UNSET_TEAM_STYLE,
            (EntityClass::Ball, _) => BALL_STYLE,
            (EntityClass::Referee, _) => REFEREE_STYLE,
            (EntityClass::Other(_), _) => OTHER_STYLE,
        }
    }
}

/// The size of the tactical map canvas in pixels.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MapSize {
    pub width: i32,
    pub height: i32,
}

impl Default for MapSize {
    fn default() -> Self {
        Self {
            width: DEFAULT_MAP_WIDTH,
            height: DEFAULT_MAP_HEIGHT,
        }
    }
}

impl MapSize {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn as_size(self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Maps a court fraction to a canvas pixel, truncating toward zero without clamping.
    pub fn to_pixel(self, position: Point2d) -> Point {
        Point::new(
            (position.x * self.width as f64) as i32,
            (position.y * self.height as f64) as i32,
        )
    }
}

/// Renders one top-down frame per frame index of `tracks` into `sink`.
///
/// Frames are visited in ascending index order and frames without entities still produce a
/// frame. `fps` is validated here but is bound to the sink when it is created.
///
/// Returns the number of frames written.
pub fn render(
    tracks: &FrameTrackSet,
    sink: &mut impl FrameSink,
    fps: f64,
    size: MapSize,
) -> Result<usize> {
    if fps <= 0.0 {
        bail!("invalid frame rate {fps}");
    }
    if size.width <= 0 || size.height <= 0 {
        bail!("invalid map size {}x{}", size.width, size.height);
    }

    let mut written = 0;
    for (_, entities) in tracks.iter() {
        let frame = render_frame(entities, size)?;
        sink.write(&frame)?;
        written += 1;
    }

    Ok(written)
}

/// Draws a single tactical frame for `entities`.
pub fn render_frame(entities: &[TrackedEntity], size: MapSize) -> Result<Mat> {
    let mut canvas = Mat::new_rows_cols_with_default(
        size.height,
        size.width,
        CV_8UC3,
        Scalar::all(0.0),
    )?;

    let center_x = size.width / 2;
    line(
        &mut canvas,
        Point::new(center_x, 0),
        Point::new(center_x, size.height),
        WHITE,
        CENTER_LINE_THICKNESS,
        LINE_8,
        0,
    )?;

    for entity in entities {
        let style = MarkerStyle::for_entity(entity);
        circle(
            &mut canvas,
            size.to_pixel(entity.position),
            style.radius,
            style.color,
            FILLED,
            LINE_8,
            0,
        )?;
    }

    Ok(canvas)
}

/// Renders `tracks` into a new video file at `path`.
///
/// The video is released after the last frame, even when rendering fails midway.
pub fn generate_tactical_map(
    tracks: &FrameTrackSet,
    path: impl AsRef<Path>,
    fps: f64,
    size: MapSize,
) -> Result<usize> {
    let path = path.as_ref();
    let mut sink = VideoSink::create(path, size.as_size(), fps)?;
    let result = render(tracks, &mut sink, fps, size);
    sink.release()?;

    let frames = result?;
    info!("tactical map video saved to {} ({frames} frames)", path.display());
    Ok(frames)
}

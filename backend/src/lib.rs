mod detect;
mod homography;
mod models;
mod pipeline;
mod run;
mod tactical;
mod tracker;
mod video;

pub use {
    detect::{Detector, YoloDetector},
    homography::{
        COURT_HEIGHT, COURT_WIDTH, Homography, compute_homography, destination_quad, project,
        source_quad,
    },
    models::*,
    pipeline::{
        VideoSummary, annotate, entities_from_tracks, find_videos, normalize, process_video,
        run_batch,
    },
    run::{init, run},
    strum::{IntoEnumIterator, ParseError},
    tactical::{
        AWAY_PLAYER_STYLE, BALL_STYLE, DEFAULT_MAP_HEIGHT, DEFAULT_MAP_WIDTH, HOME_PLAYER_STYLE,
        MapSize, MarkerStyle, OTHER_STYLE, PLAYER_UNSET_TEAM_STYLE, REFEREE_STYLE,
        generate_tactical_map, render, render_frame,
    },
    tracker::{ByteTracker, Detection, STrack, centroid},
    video::{FrameSink, VideoSink, VideoSource},
};

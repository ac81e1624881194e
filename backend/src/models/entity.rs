use std::{collections::BTreeMap, fmt};

use opencv::core::Point2d;
use strum::{Display, EnumIter, EnumString};

/// The category of a tracked entity.
///
/// Labels other than the three known ones are carried through as [`EntityClass::Other`] without
/// being validated.
#[derive(Clone, PartialEq, Eq, Hash, Debug, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EntityClass {
    Player,
    Ball,
    Referee,
    #[strum(default)]
    Other(String),
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityClass::Player => f.write_str("player"),
            EntityClass::Ball => f.write_str("ball"),
            EntityClass::Referee => f.write_str("referee"),
            EntityClass::Other(label) => f.write_str(label),
        }
    }
}

/// The team a player belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display, EnumIter)]
pub enum Team {
    /// Team label `0`.
    Home,
    /// Team label `1`.
    Away,
}

impl Team {
    pub fn label(self) -> u8 {
        match self {
            Team::Home => 0,
            Team::Away => 1,
        }
    }

    pub fn from_label(label: u8) -> Option<Team> {
        match label {
            0 => Some(Team::Home),
            1 => Some(Team::Away),
            _ => None,
        }
    }

    /// Assigns a team by which horizontal half of the frame the centroid `x` falls in.
    ///
    /// The left half is [`Team::Home`].
    pub fn from_half_plane(x: f64, frame_width: i32) -> Team {
        if x < frame_width as f64 / 2.0 {
            Team::Home
        } else {
            Team::Away
        }
    }
}

/// A single entity observed in one frame.
#[derive(Clone, PartialEq, Debug)]
pub struct TrackedEntity {
    pub identity: Option<u64>,
    pub class: EntityClass,
    /// Only ever set when `class` is [`EntityClass::Player`].
    team: Option<Team>,
    /// Position in court fractions, nominally within `[0, 1] x [0, 1]`.
    pub position: Point2d,
}

impl TrackedEntity {
    /// Creates an entity of `class` without identity or team.
    pub fn new(class: EntityClass, position: Point2d) -> Self {
        Self {
            identity: None,
            class,
            team: None,
            position,
        }
    }

    pub fn player(team: Option<Team>, position: Point2d) -> Self {
        Self {
            identity: None,
            class: EntityClass::Player,
            team,
            position,
        }
    }

    pub fn ball(position: Point2d) -> Self {
        Self::new(EntityClass::Ball, position)
    }

    pub fn referee(position: Point2d) -> Self {
        Self::new(EntityClass::Referee, position)
    }

    pub fn with_identity(mut self, identity: Option<u64>) -> Self {
        self.identity = identity;
        self
    }

    pub fn team(&self) -> Option<Team> {
        self.team
    }
}

/// Entities per frame index.
///
/// Iteration always goes through frame indices in ascending order no matter the order they were
/// inserted in. Entities within a frame keep their insertion order, which is also their drawing
/// order.
#[derive(Clone, PartialEq, Default, Debug)]
pub struct FrameTrackSet {
    frames: BTreeMap<u64, Vec<TrackedEntity>>,
}

impl FrameTrackSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the entities of `frame` with `entities`.
    pub fn insert(&mut self, frame: u64, entities: Vec<TrackedEntity>) {
        self.frames.insert(frame, entities);
    }

    /// Appends `entity` to `frame`, creating the frame if needed.
    pub fn push(&mut self, frame: u64, entity: TrackedEntity) {
        self.frames.entry(frame).or_default().push(entity);
    }

    pub fn get(&self, frame: u64) -> Option<&[TrackedEntity]> {
        self.frames.get(&frame).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &[TrackedEntity])> {
        self.frames
            .iter()
            .map(|(frame, entities)| (*frame, entities.as_slice()))
    }
}

impl FromIterator<(u64, Vec<TrackedEntity>)> for FrameTrackSet {
    fn from_iter<T: IntoIterator<Item = (u64, Vec<TrackedEntity>)>>(iter: T) -> Self {
        Self {
            frames: iter.into_iter().collect(),
        }
    }
}

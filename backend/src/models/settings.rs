use std::{collections::BTreeMap, fs, path::Path, path::PathBuf, str::FromStr};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::deserialize_with_ok_or_default;
use crate::EntityClass;

/// How a detection's pixel centroid is turned into court fractions.
#[derive(
    Clone, Copy, PartialEq, Default, Debug, Serialize, Deserialize, EnumIter, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Normalization {
    /// Divides the centroid by the frame size.
    #[default]
    Frame,
    /// Projects the centroid through the video's homography and divides by the court size.
    Court,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub tracked_dir: PathBuf,
    pub tactical_dir: PathBuf,
    pub model_path: PathBuf,
    pub onnxruntime_path: Option<PathBuf>,
    pub confidence_threshold: f32,
    pub min_match_iou: f32,
    /// Detector class id to entity class label.
    pub class_map: BTreeMap<u32, String>,
    pub map_width: i32,
    pub map_height: i32,
    #[serde(deserialize_with = "deserialize_with_ok_or_default")]
    pub normalization: Normalization,
    pub progress_interval: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            tracked_dir: PathBuf::from("output/tracked"),
            tactical_dir: PathBuf::from("output/tactical"),
            model_path: PathBuf::from("yolov8n_nms.onnx"),
            onnxruntime_path: None,
            confidence_threshold: 0.4,
            min_match_iou: 0.5,
            class_map: class_map_default(),
            map_width: 640,
            map_height: 360,
            normalization: Normalization::default(),
            progress_interval: 50,
        }
    }
}

impl Settings {
    /// Reads settings from the JSON file at `path`.
    ///
    /// Fields missing from the file take their default values.
    pub fn load(path: impl AsRef<Path>) -> Result<Settings> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings {}", path.display()))?;
        let settings = serde_json::from_str(&json)
            .with_context(|| format!("failed to parse settings {}", path.display()))?;
        Ok(settings)
    }

    /// Resolves `class_map` labels into [`EntityClass`].
    pub fn entity_classes(&self) -> BTreeMap<u32, EntityClass> {
        self.class_map
            .iter()
            .map(|(id, label)| {
                let class = EntityClass::from_str(label)
                    .unwrap_or_else(|_| EntityClass::Other(label.clone()));
                (*id, class)
            })
            .collect()
    }
}

// COCO ids. Class 1 is a placeholder for referees.
fn class_map_default() -> BTreeMap<u32, String> {
    BTreeMap::from([
        (0, "player".to_string()),
        (1, "referee".to_string()),
        (32, "ball".to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use std::env;

    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let settings =
            serde_json::from_str::<Settings>(r#"{ "map_width": 800, "normalization": "court" }"#)
                .unwrap();

        assert_eq!(settings.map_width, 800);
        assert_eq!(settings.map_height, 360);
        assert_eq!(settings.normalization, Normalization::Court);
        assert_eq!(settings.progress_interval, 50);
        assert_eq!(settings.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn invalid_normalization_falls_back_to_default() {
        let settings =
            serde_json::from_str::<Settings>(r#"{ "normalization": "sideways" }"#).unwrap();

        assert_eq!(settings.normalization, Normalization::Frame);
    }

    #[test]
    fn class_map_resolves_entity_classes() {
        let settings = serde_json::from_str::<Settings>(
            r#"{ "class_map": { "0": "player", "5": "goalkeeper" } }"#,
        )
        .unwrap();
        let classes = settings.entity_classes();

        assert_eq!(classes.get(&0), Some(&EntityClass::Player));
        assert_eq!(
            classes.get(&5),
            Some(&EntityClass::Other("goalkeeper".to_string()))
        );
        assert_eq!(classes.get(&32), None);
    }

    #[test]
    fn default_class_map() {
        let classes = Settings::default().entity_classes();

        assert_eq!(classes.get(&0), Some(&EntityClass::Player));
        assert_eq!(classes.get(&1), Some(&EntityClass::Referee));
        assert_eq!(classes.get(&32), Some(&EntityClass::Ball));
    }

    #[test]
    fn load_reads_file() {
        let path = env::temp_dir().join("courtview_settings_load_reads_file.json");
        fs::write(&path, r#"{ "progress_interval": 10 }"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(settings.progress_interval, 10);
        assert!(Settings::load(env::temp_dir().join("courtview_missing.json")).is_err());
    }
}

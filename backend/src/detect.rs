use std::{collections::BTreeMap, fmt, path::Path};

use anyhow::{Context, Result};
use log::info;
#[cfg(test)]
use mockall::automock;
use opencv::{
    core::{
        BORDER_CONSTANT, CV_32FC3, Mat, MatTraitConst, MatTraitConstManual, Point, Rect, Scalar,
        Size, Vector, transpose_nd,
    },
    imgproc::{COLOR_BGR2RGB, INTER_LINEAR, cvt_color_def, resize},
};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{Session, SessionInputValue, SessionOutputs},
    value::TensorRef,
};

use crate::{EntityClass, tracker::Detection};

/// Square input side of the YOLO model.
const YOLO_INPUT_SIZE: f32 = 640.0;

/// A trait for detecting entities from a BGR video frame.
#[cfg_attr(test, automock)]
pub trait Detector: fmt::Debug {
    /// Detects entities in `frame`.
    ///
    /// Detections of classes the detector does not know about are dropped.
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>>;
}

/// A [`Detector`] running a YOLO model exported with NMS.
///
/// Each output row is `[x1, y1, x2, y2, score, class_id]` in letterboxed input coordinates.
pub struct YoloDetector {
    session: Session,
    classes: BTreeMap<u32, EntityClass>,
    confidence_threshold: f32,
}

impl fmt::Debug for YoloDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YoloDetector")
            .field("classes", &self.classes)
            .field("confidence_threshold", &self.confidence_threshold)
            .finish_non_exhaustive()
    }
}

impl YoloDetector {
    pub fn new(
        model: impl AsRef<Path>,
        classes: BTreeMap<u32, EntityClass>,
        confidence_threshold: f32,
    ) -> Result<Self> {
        let model = model.as_ref();
        let session = build_session(model)
            .with_context(|| format!("failed to load model {}", model.display()))?;
        info!("loaded detection model {}", model.display());

        Ok(Self {
            session,
            classes,
            confidence_threshold,
        })
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>> {
        let size = frame.size()?;
        let letterbox = preprocess_for_yolo(frame)?;
        let outputs = self.session.run([to_input_value(&letterbox.mat)?])?;
        let predictions = from_output_value(&outputs)?;

        let mut detections = Vec::new();
        for i in 0..predictions.rows() {
            let pred = predictions.at_row::<f32>(i)?;
            if let Some(detection) = to_detection(
                pred,
                &self.classes,
                self.confidence_threshold,
                size,
                &letterbox,
            ) {
                detections.push(detection);
            }
        }

        Ok(detections)
    }
}

/// A letterboxed model input and how to map back to the source frame.
#[derive(Debug)]
struct Letterbox {
    mat: Mat,
    ratio: f32,
    left: i32,
    top: i32,
}

fn to_detection(
    pred: &[f32],
    classes: &BTreeMap<u32, EntityClass>,
    confidence_threshold: f32,
    size: Size,
    letterbox: &Letterbox,
) -> Option<Detection> {
    if pred.len() < 6 || pred[4] < confidence_threshold || pred[5] < 0.0 {
        return None;
    }
    let class = classes.get(&(pred[5] as u32))?;
    let bbox = remap_from_yolo(pred, size, letterbox);
    if bbox.width <= 0 || bbox.height <= 0 {
        return None;
    }

    Some(Detection::new(bbox, class.clone(), pred[4]))
}

fn remap_from_yolo(pred: &[f32], size: Size, letterbox: &Letterbox) -> Rect {
    let left = letterbox.left as f32;
    let top = letterbox.top as f32;
    let ratio = letterbox.ratio;
    let tl_x = ((pred[0] - left) / ratio).max(0.0).min(size.width as f32);
    let tl_y = ((pred[1] - top) / ratio).max(0.0).min(size.height as f32);
    let br_x = ((pred[2] - left) / ratio).max(0.0).min(size.width as f32);
    let br_y = ((pred[3] - top) / ratio).max(0.0).min(size.height as f32);
    Rect::from_points(
        Point::new(tl_x as i32, tl_y as i32),
        Point::new(br_x as i32, br_y as i32),
    )
}

/// Resizes a BGR `Mat` to fit the model input keeping its aspect ratio, pads it with gray and
/// normalizes it to `f32` RGB.
///
/// https://github.com/ultralytics/ultralytics/blob/main/ultralytics/data/augment.py
fn preprocess_for_yolo(mat: &impl MatTraitConst) -> Result<Letterbox> {
    let size = mat.size()?;
    let (w_ratio, h_ratio) = (
        YOLO_INPUT_SIZE / size.width as f32,
        YOLO_INPUT_SIZE / size.height as f32,
    );
    let ratio = w_ratio.min(h_ratio);

    let w = (size.width as f32 * ratio).round();
    let h = (size.height as f32 * ratio).round();

    let pad_w = (YOLO_INPUT_SIZE - w) / 2.0;
    let pad_h = (YOLO_INPUT_SIZE - h) / 2.0;

    let top = (pad_h - 0.1).round() as i32;
    let bottom = (pad_h + 0.1).round() as i32;
    let left = (pad_w - 0.1).round() as i32;
    let right = (pad_w + 0.1).round() as i32;

    let mut rgb = Mat::default();
    cvt_color_def(mat, &mut rgb, COLOR_BGR2RGB)?;
    let mut resized = Mat::default();
    resize(
        &rgb,
        &mut resized,
        Size::new(w as i32, h as i32),
        0.0,
        0.0,
        INTER_LINEAR,
    )?;
    let mut padded = Mat::default();
    opencv::core::copy_make_border(
        &resized,
        &mut padded,
        top,
        bottom,
        left,
        right,
        BORDER_CONSTANT,
        Scalar::all(114.0),
    )?;
    let mut normalized = Mat::default();
    padded.convert_to(&mut normalized, CV_32FC3, 1.0 / 255.0, 0.0)?;

    Ok(Letterbox {
        mat: normalized,
        ratio,
        left,
        top,
    })
}

/// Extracts `output0` as a `[N, 6]` `Mat`.
fn from_output_value(result: &SessionOutputs) -> Result<Mat> {
    let (dims, outputs) = result["output0"].try_extract_tensor::<f32>()?;
    let dims = dims.iter().map(|&dim| dim as i32).collect::<Vec<i32>>();
    let mat = Mat::new_nd_with_data(dims.as_slice(), outputs)?;
    let mat = mat.reshape_nd(1, &dims.as_slice()[1..])?;
    Ok(mat.clone_pointee())
}

/// Converts a continuous, normalized `f32` RGB `Mat` image to `SessionInputValue`.
///
/// The `Mat` is reshaped to single channel and transposed to `[1, 3, H, W]`.
fn to_input_value(mat: &impl MatTraitConst) -> Result<SessionInputValue<'_>> {
    let mat = mat.reshape_nd(1, &[1, mat.rows(), mat.cols(), 3])?;
    let mut mat_t = Mat::default();
    transpose_nd(&mat, &Vector::from_slice(&[0, 3, 1, 2]), &mut mat_t)?;
    let shape = mat_t.mat_size();
    let input = (shape.as_slice(), mat_t.data_typed::<f32>()?);
    let tensor = TensorRef::from_array_view(input)?;
    Ok(SessionInputValue::Owned(tensor.clone().into_dyn()))
}

fn build_session(model: &Path) -> Result<Session> {
    if cfg!(feature = "gpu") {
        Ok(Session::builder()?
            .with_execution_providers([CUDAExecutionProvider::default().build()])?
            .commit_from_file(model)?)
    } else {
        Ok(Session::builder()?.commit_from_file(model)?)
    }
}

#[cfg(test)]
mod tests {
    use opencv::core::CV_8UC3;

    use super::*;

    fn classes() -> BTreeMap<u32, EntityClass> {
        BTreeMap::from([
            (0, EntityClass::Player),
            (1, EntityClass::Referee),
            (32, EntityClass::Ball),
        ])
    }

    fn letterbox(ratio: f32, left: i32, top: i32) -> Letterbox {
        Letterbox {
            mat: Mat::default(),
            ratio,
            left,
            top,
        }
    }

    #[test]
    fn preprocess_letterboxes_wide_frame() {
        let frame =
            Mat::new_rows_cols_with_default(360, 1280, CV_8UC3, Scalar::all(50.0)).unwrap();

        let letterbox = preprocess_for_yolo(&frame).unwrap();

        assert_eq!(letterbox.mat.size().unwrap(), Size::new(640, 640));
        assert_eq!(letterbox.mat.typ(), CV_32FC3);
        assert_eq!(letterbox.ratio, 0.5);
        assert_eq!(letterbox.left, 0);
        assert_eq!(letterbox.top, 230);
    }

    #[test]
    fn remap_undoes_letterbox() {
        let bbox = remap_from_yolo(
            &[100.0, 250.0, 200.0, 330.0, 0.9, 0.0],
            Size::new(1280, 360),
            &letterbox(0.5, 0, 230),
        );

        assert_eq!(bbox, Rect::new(200, 40, 200, 160));
    }

    #[test]
    fn remap_clamps_to_frame() {
        let bbox = remap_from_yolo(
            &[-10.0, 200.0, 700.0, 700.0, 0.9, 0.0],
            Size::new(1280, 360),
            &letterbox(0.5, 0, 230),
        );

        assert_eq!(bbox, Rect::new(0, 0, 1280, 360));
    }

    #[test]
    fn to_detection_maps_known_classes() {
        let size = Size::new(640, 640);
        let letterbox = letterbox(1.0, 0, 0);

        let detection = to_detection(
            &[10.0, 10.0, 30.0, 50.0, 0.8, 32.0],
            &classes(),
            0.4,
            size,
            &letterbox,
        )
        .unwrap();
        assert_eq!(detection.class(), &EntityClass::Ball);
        assert_eq!(detection.bbox(), Rect::new(10, 10, 20, 40));
        assert_eq!(detection.score(), 0.8);

        let referee = to_detection(
            &[10.0, 10.0, 30.0, 50.0, 0.8, 1.0],
            &classes(),
            0.4,
            size,
            &letterbox,
        )
        .unwrap();
        assert_eq!(referee.class(), &EntityClass::Referee);
    }

    #[test]
    fn to_detection_drops_unknown_classes_and_low_scores() {
        let size = Size::new(640, 640);
        let letterbox = letterbox(1.0, 0, 0);
        let classes = classes();

        assert!(
            to_detection(
                &[10.0, 10.0, 30.0, 50.0, 0.9, 2.0],
                &classes,
                0.4,
                size,
                &letterbox
            )
            .is_none()
        );
        assert!(
            to_detection(
                &[10.0, 10.0, 30.0, 50.0, 0.39, 0.0],
                &classes,
                0.4,
                size,
                &letterbox
            )
            .is_none()
        );
        assert!(
            to_detection(
                &[10.0, 10.0, 10.0, 50.0, 0.9, 0.0],
                &classes,
                0.4,
                size,
                &letterbox
            )
            .is_none()
        );
    }
}

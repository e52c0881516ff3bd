//! Multi-scale Haar cascade face detection.
//!
//! Scans an image pyramid with the cascade window, then clusters the raw
//! window hits and keeps clusters with enough neighbours, the way OpenCV's
//! `detectMultiScale` does.

use crate::cascade::HaarCascade;
use crate::imgproc::{resize_bilinear, IntegralImage};
use crate::types::{BoundingBox, FaceRegion};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
/// Pyramid step between scan scales.
pub const DEFAULT_SCALE_FACTOR: f64 = 1.3;
/// A face must be hit by more than this many overlapping windows.
pub const DEFAULT_MIN_NEIGHBORS: u32 = 5;
/// Relative tolerance when clustering window hits.
const GROUP_EPS: f64 = 0.2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("invalid frame: expected {expected} bytes, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("invalid detector parameters: {0}")]
    InvalidParams(String),
    #[error("detection failed: {0}")]
    DetectionFailed(String),
}

/// Locates faces in a grayscale image.
pub trait FaceDetector: Send + Sync {
    /// Detect faces, returning rectangles in detector-defined order.
    fn detect(&self, gray: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, DetectorError>;

    /// Detect faces and copy out the pixels each one bounds.
    fn detect_regions(
        &self,
        gray: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceRegion>, DetectorError> {
        Ok(self
            .detect(gray, width, height)?
            .into_iter()
            .filter_map(|bbox| FaceRegion::crop(gray, width, height, bbox))
            .collect())
    }
}

impl<D: FaceDetector + ?Sized> FaceDetector for Arc<D> {
    fn detect(&self, gray: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, DetectorError> {
        (**self).detect(gray, width, height)
    }
}

/// Scan parameters for [`CascadeDetector`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    pub scale_factor: f64,
    pub min_neighbors: u32,
    /// Smallest face side in pixels; 0 means the cascade window size.
    pub min_face_size: u32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_face_size: 0,
        }
    }
}

impl DetectorParams {
    pub fn validate(&self) -> Result<(), DetectorError> {
        if !(self.scale_factor > 1.0 && self.scale_factor.is_finite()) {
            return Err(DetectorError::InvalidParams(format!(
                "scale_factor must be > 1.0, got {}",
                self.scale_factor
            )));
        }
        Ok(())
    }
}

/// Haar cascade detector with OpenCV `detectMultiScale` semantics.
pub struct CascadeDetector {
    cascade: Arc<HaarCascade>,
    params: DetectorParams,
}

impl CascadeDetector {
    pub fn new(cascade: Arc<HaarCascade>, params: DetectorParams) -> Result<Self, DetectorError> {
        params.validate()?;
        Ok(Self { cascade, params })
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    /// Raw window hits over all scales, before grouping.
    fn scan(&self, gray: &[u8], width: usize, height: usize) -> Vec<Rect> {
        let (cw, ch) = (self.cascade.window_width, self.cascade.window_height);
        let min_side = self.params.min_face_size as usize;
        let mut hits = Vec::new();
        let mut factor = 1.0f64;

        loop {
            let win_w = (cw as f64 * factor).round() as usize;
            let win_h = (ch as f64 * factor).round() as usize;
            if win_w > width || win_h > height {
                break;
            }

            let scaled_w = (width as f64 / factor).round() as usize;
            let scaled_h = (height as f64 / factor).round() as usize;
            if scaled_w <= cw || scaled_h <= ch {
                break;
            }

            if win_w >= min_side && win_h >= min_side {
                let scaled = if factor == 1.0 {
                    gray.to_vec()
                } else {
                    resize_bilinear(gray, width, height, scaled_w, scaled_h)
                };
                let ii = IntegralImage::new(&scaled, scaled_w, scaled_h);
                let step = if factor > 2.0 { 1 } else { 2 };

                for y in (0..scaled_h - ch).step_by(step) {
                    for x in (0..scaled_w - cw).step_by(step) {
                        if self.cascade.evaluate(&ii, x, y) {
                            hits.push(Rect {
                                x: (x as f64 * factor).round() as i32,
                                y: (y as f64 * factor).round() as i32,
                                width: win_w as i32,
                                height: win_h as i32,
                            });
                        }
                    }
                }
            }

            factor *= self.params.scale_factor;
        }

        hits
    }
}

impl FaceDetector for CascadeDetector {
    fn detect(&self, gray: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, DetectorError> {
        let (w, h) = (width as usize, height as usize);
        if gray.len() != w * h {
            return Err(DetectorError::InvalidFrame {
                expected: w * h,
                actual: gray.len(),
            });
        }

        let hits = self.scan(gray, w, h);
        let grouped = group_rectangles(&hits, self.params.min_neighbors, GROUP_EPS);
        tracing::trace!(hits = hits.len(), faces = grouped.len(), "cascade scan");

        Ok(grouped
            .into_iter()
            .filter_map(|r| r.to_bbox())
            .filter_map(|b| b.clamp_to(width, height))
            .collect())
    }
}

/// Signed rectangle used while clustering window hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    x: i32,
    y: i32,
    width: i32,
    height: i32,
}

impl Rect {
    fn to_bbox(self) -> Option<BoundingBox> {
        if self.x < 0 || self.y < 0 || self.width <= 0 || self.height <= 0 {
            return None;
        }
        Some(BoundingBox::new(
            self.x as u32,
            self.y as u32,
            self.width as u32,
            self.height as u32,
        ))
    }

    fn similar(&self, other: &Rect, eps: f64) -> bool {
        let delta = eps
            * (self.width.min(other.width) + self.height.min(other.height)) as f64
            * 0.5;
        (self.x - other.x).abs() as f64 <= delta
            && (self.y - other.y).abs() as f64 <= delta
            && (self.x + self.width - other.x - other.width).abs() as f64 <= delta
            && (self.y + self.height - other.y - other.height).abs() as f64 <= delta
    }
}

/// Cluster similar rectangles and keep clusters with more than `min_neighbors` members.
///
/// Each surviving cluster is replaced by its average rectangle; clusters nested
/// inside a stronger cluster are dropped. Output follows the order in which
/// clusters first appear in the input. With `min_neighbors == 0` the input is
/// returned unchanged.
fn group_rectangles(rects: &[Rect], min_neighbors: u32, eps: f64) -> Vec<Rect> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    // Union-find over the similarity relation.
    let mut parent: Vec<usize> = (0..rects.len()).collect();
    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }
    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if rects[i].similar(&rects[j], eps) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // Label clusters in order of first appearance.
    let mut class_of_root = vec![usize::MAX; rects.len()];
    let mut sums: Vec<[i64; 4]> = Vec::new();
    let mut counts: Vec<u32> = Vec::new();
    for (i, r) in rects.iter().enumerate() {
        let root = find(&mut parent, i);
        if class_of_root[root] == usize::MAX {
            class_of_root[root] = sums.len();
            sums.push([0; 4]);
            counts.push(0);
        }
        let cls = class_of_root[root];
        sums[cls][0] += r.x as i64;
        sums[cls][1] += r.y as i64;
        sums[cls][2] += r.width as i64;
        sums[cls][3] += r.height as i64;
        counts[cls] += 1;
    }

    let averaged: Vec<Rect> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &n)| {
            let n = n as f64;
            Rect {
                x: (s[0] as f64 / n).round() as i32,
                y: (s[1] as f64 / n).round() as i32,
                width: (s[2] as f64 / n).round() as i32,
                height: (s[3] as f64 / n).round() as i32,
            }
        })
        .collect();

    let mut kept = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= min_neighbors {
            continue;
        }
        let nested = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i32;
            let dy = (r2.height as f64 * eps).round() as i32;
            r1.x >= r2.x - dx
                && r1.y >= r2.y - dy
                && r1.x + r1.width <= r2.x + r2.width + dx
                && r1.y + r1.height <= r2.y + r2.height + dy
                && (n2 > n1.max(3) || n1 < 3)
        });
        if !nested {
            kept.push(*r1);
        }
    }
    kept
}

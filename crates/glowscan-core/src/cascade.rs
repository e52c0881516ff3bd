//! Haar cascade model in the OpenCV `opencv-cascade-classifier` XML format.
//!
//! Only boosted stages over upright HAAR features are supported, which covers
//! the stock `haarcascade_frontalface_*.xml` files shipped with OpenCV.

use crate::imgproc::IntegralImage;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0}; install OpenCV's haarcascades or set GLOWSCAN_CASCADE_PATH")]
    ModelNotFound(String),
    #[error("failed to read cascade: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed cascade XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("invalid cascade: {0}")]
    Format(String),
    #[error("unsupported cascade: {0}")]
    Unsupported(String),
}

/// One rectangle of a Haar feature, in window coordinates.
#[derive(Debug, Clone, Copy)]
struct WeightedRect {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
    weight: f32,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<WeightedRect>,
}

/// Split node of a weak classifier tree.
///
/// Child indices `<= 0` address `leaves[-idx]`; positive ones address another node.
#[derive(Debug, Clone, Copy)]
struct TreeNode {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f32,
}

#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<TreeNode>,
    leaves: Vec<f32>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f32,
    classifiers: Vec<WeakClassifier>,
}

/// A loaded, immutable Haar cascade.
#[derive(Debug)]
pub struct HaarCascade {
    pub window_width: usize,
    pub window_height: usize,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

impl HaarCascade {
    /// Load a cascade from an OpenCV XML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CascadeError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CascadeError::ModelNotFound(path.display().to_string()));
        }
        let xml = std::fs::read_to_string(path)?;
        let cascade = Self::from_xml(&xml)?;
        tracing::info!(
            path = %path.display(),
            stages = cascade.stages.len(),
            features = cascade.features.len(),
            window = ?(cascade.window_width, cascade.window_height),
            "loaded Haar cascade"
        );
        Ok(cascade)
    }

    /// Parse a cascade from OpenCV XML text.
    pub fn from_xml(xml: &str) -> Result<Self, CascadeError> {
        let doc = roxmltree::Document::parse(xml)?;
        let root = doc
            .descendants()
            .find(|n| n.has_tag_name("cascade"))
            .ok_or_else(|| {
                CascadeError::Unsupported(
                    "no <cascade> element (old-style haar cascades are not supported)".into(),
                )
            })?;

        if let Some(stage_type) = child(root, "stageType") {
            if text(stage_type).trim() != "BOOST" {
                return Err(CascadeError::Unsupported(format!(
                    "stage type {}",
                    text(stage_type).trim()
                )));
            }
        }
        let feature_type = child(root, "featureType").map(|n| text(n).trim().to_string());
        if feature_type.as_deref() != Some("HAAR") {
            return Err(CascadeError::Unsupported(format!(
                "feature type {}",
                feature_type.unwrap_or_else(|| "<missing>".into())
            )));
        }

        let window_width: usize = parse_child(root, "width")?;
        let window_height: usize = parse_child(root, "height")?;
        if window_width < 3 || window_height < 3 {
            return Err(CascadeError::Format(format!(
                "window {window_width}x{window_height} is too small"
            )));
        }

        let features = required(root, "features")?
            .children()
            .filter(|n| n.is_element())
            .map(|n| parse_feature(n, window_width, window_height))
            .collect::<Result<Vec<_>, _>>()?;

        let stages = required(root, "stages")?
            .children()
            .filter(|n| n.is_element())
            .map(|n| parse_stage(n, features.len()))
            .collect::<Result<Vec<_>, _>>()?;

        if stages.is_empty() {
            return Err(CascadeError::Format("cascade has no stages".into()));
        }

        Ok(Self {
            window_width,
            window_height,
            stages,
            features,
        })
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Run every stage on the window whose top-left corner is `(x, y)`.
    ///
    /// The window must lie fully inside the integral image.
    pub(crate) fn evaluate(&self, ii: &IntegralImage, x: usize, y: usize) -> bool {
        // Variance normalisation over the window inset by one pixel.
        let (nw, nh) = (self.window_width - 2, self.window_height - 2);
        let area = (nw * nh) as f64;
        let valsum = ii.rect_sum(x + 1, y + 1, nw, nh) as f64;
        let sqsum = ii.rect_sqsum(x + 1, y + 1, nw, nh) as f64;
        let nf = area * sqsum - valsum * valsum;
        let inv_norm = if nf > 0.0 { 1.0 / nf.sqrt() } else { 1.0 };

        for stage in &self.stages {
            let mut sum = 0.0f32;
            for weak in &stage.classifiers {
                let mut node_idx = 0usize;
                loop {
                    let node = &weak.nodes[node_idx];
                    let value = self.feature_value(node.feature, ii, x, y) * inv_norm;
                    let next = if value < node.threshold as f64 {
                        node.left
                    } else {
                        node.right
                    };
                    if next <= 0 {
                        sum += weak.leaves[(-next) as usize];
                        break;
                    }
                    node_idx = next as usize;
                }
            }
            if sum < stage.threshold {
                return false;
            }
        }
        true
    }

    #[inline]
    fn feature_value(&self, feature: usize, ii: &IntegralImage, x: usize, y: usize) -> f64 {
        self.features[feature]
            .rects
            .iter()
            .map(|r| r.weight as f64 * ii.rect_sum(x + r.x, y + r.y, r.width, r.height) as f64)
            .sum()
    }
}

fn child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

fn required<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Result<roxmltree::Node<'a, 'input>, CascadeError> {
    child(node, name).ok_or_else(|| CascadeError::Format(format!("missing <{name}>")))
}

fn text<'a>(node: roxmltree::Node<'a, '_>) -> &'a str {
    node.text().unwrap_or("")
}

fn parse_child<T: std::str::FromStr>(node: roxmltree::Node, name: &str) -> Result<T, CascadeError> {
    let raw = text(required(node, name)?).trim();
    raw.parse()
        .map_err(|_| CascadeError::Format(format!("<{name}> is not a number: {raw:?}")))
}

fn parse_numbers<T: std::str::FromStr>(raw: &str, what: &str) -> Result<Vec<T>, CascadeError> {
    raw.split_whitespace()
        .map(|tok| {
            tok.parse()
                .map_err(|_| CascadeError::Format(format!("bad number {tok:?} in {what}")))
        })
        .collect()
}

fn parse_feature(
    node: roxmltree::Node,
    window_width: usize,
    window_height: usize,
) -> Result<HaarFeature, CascadeError> {
    if let Some(tilted) = child(node, "tilted") {
        if text(tilted).trim() != "0" {
            return Err(CascadeError::Unsupported("tilted HAAR features".into()));
        }
    }

    let mut rects = Vec::new();
    for rect in required(node, "rects")?.children().filter(|n| n.is_element()) {
        let values: Vec<f32> = parse_numbers(text(rect), "rect")?;
        let &[x, y, w, h, weight] = values.as_slice() else {
            return Err(CascadeError::Format(format!(
                "rect needs 5 values, got {}",
                values.len()
            )));
        };
        if x < 0.0 || y < 0.0 || w <= 0.0 || h <= 0.0 {
            return Err(CascadeError::Format(format!("negative rect {values:?}")));
        }
        let r = WeightedRect {
            x: x as usize,
            y: y as usize,
            width: w as usize,
            height: h as usize,
            weight,
        };
        if r.x + r.width > window_width || r.y + r.height > window_height {
            return Err(CascadeError::Format(format!(
                "rect {values:?} exceeds {window_width}x{window_height} window"
            )));
        }
        rects.push(r);
    }

    if rects.is_empty() {
        return Err(CascadeError::Format("feature without rects".into()));
    }
    Ok(HaarFeature { rects })
}

fn parse_stage(node: roxmltree::Node, feature_count: usize) -> Result<Stage, CascadeError> {
    let threshold: f32 = parse_child(node, "stageThreshold")?;

    let mut classifiers = Vec::new();
    for weak in required(node, "weakClassifiers")?
        .children()
        .filter(|n| n.is_element())
    {
        let raw_nodes: Vec<f64> = parse_numbers(text(required(weak, "internalNodes")?), "internalNodes")?;
        let leaves: Vec<f32> = parse_numbers(text(required(weak, "leafValues")?), "leafValues")?;

        if raw_nodes.is_empty() || raw_nodes.len() % 4 != 0 {
            return Err(CascadeError::Format(format!(
                "internalNodes holds {} values, expected groups of 4",
                raw_nodes.len()
            )));
        }

        let nodes: Vec<TreeNode> = raw_nodes
            .chunks_exact(4)
            .map(|c| TreeNode {
                left: c[0] as i32,
                right: c[1] as i32,
                feature: c[2] as usize,
                threshold: c[3] as f32,
            })
            .collect();

        for n in &nodes {
            if n.feature >= feature_count {
                return Err(CascadeError::Format(format!(
                    "feature index {} out of range ({feature_count} features)",
                    n.feature
                )));
            }
            for idx in [n.left, n.right] {
                let valid = if idx <= 0 {
                    ((-idx) as usize) < leaves.len()
                } else {
                    (idx as usize) < nodes.len()
                };
                if !valid {
                    return Err(CascadeError::Format(format!("tree child {idx} out of range")));
                }
            }
        }

        classifiers.push(WeakClassifier { nodes, leaves });
    }

    Ok(Stage {
        threshold,
        classifiers,
    })
}

/// Lazily loads a cascade and shares it while anyone holds it.
///
/// The model is read on first use and dropped when the last `Arc` returned by
/// [`get`](Self::get) goes away; the next `get` reloads it.
pub struct CascadeCache {
    path: PathBuf,
    slot: Mutex<Weak<HaarCascade>>,
}

impl CascadeCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            slot: Mutex::new(Weak::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the shared cascade, loading it if nobody holds it.
    pub fn get(&self) -> Result<Arc<HaarCascade>, CascadeError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cascade) = slot.upgrade() {
            return Ok(cascade);
        }
        let cascade = Arc::new(HaarCascade::load(&self.path)?);
        *slot = Arc::downgrade(&cascade);
        Ok(cascade)
    }

    /// Whether a loaded cascade is currently held somewhere.
    pub fn is_loaded(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .strong_count()
            > 0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// One-stage cascade over a 20x20 window firing on "dark top half, bright bottom half".
    pub(crate) const EDGE_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier"><stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>20</height>
  <width>20</width>
  <stageParams><maxWeakCount>1</maxWeakCount></stageParams>
  <featureParams><maxCatCount>0</maxCatCount></featureParams>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>5.0000000000000000e-01</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 5.0000000000000000e-01</internalNodes>
          <leafValues>
            -1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 20 10 -1.</_>
        <_>
          0 10 20 10 1.</_></rects></_></features></cascade>
</opencv_storage>
"#;

    #[test]
    fn test_parse_edge_cascade() {
        let cascade = HaarCascade::from_xml(EDGE_CASCADE).unwrap();
        assert_eq!(cascade.window_width, 20);
        assert_eq!(cascade.window_height, 20);
        assert_eq!(cascade.stage_count(), 1);
        assert_eq!(cascade.features.len(), 1);
        assert_eq!(cascade.features[0].rects.len(), 2);
        assert_eq!(cascade.features[0].rects[1].weight, 1.0);
    }

    #[test]
    fn test_evaluate_edge_window() {
        let cascade = HaarCascade::from_xml(EDGE_CASCADE).unwrap();

        // 20x20 window: rows 0..10 dark, rows 10..20 bright
        let mut gray = vec![0u8; 20 * 20];
        gray[200..].fill(200);
        let ii = IntegralImage::new(&gray, 20, 20);
        assert!(cascade.evaluate(&ii, 0, 0));

        // Inverted edge: bright top, dark bottom
        let mut inverted = vec![200u8; 20 * 20];
        inverted[200..].fill(0);
        let ii = IntegralImage::new(&inverted, 20, 20);
        assert!(!cascade.evaluate(&ii, 0, 0));
    }

    #[test]
    fn test_evaluate_uniform_window_rejected() {
        let cascade = HaarCascade::from_xml(EDGE_CASCADE).unwrap();
        let gray = vec![180u8; 20 * 20];
        let ii = IntegralImage::new(&gray, 20, 20);
        assert!(!cascade.evaluate(&ii, 0, 0));
    }

    #[test]
    fn test_old_format_rejected() {
        let xml = r#"<opencv_storage><haarcascade_frontalface_alt type_id="opencv-haar-classifier"><size>20 20</size></haarcascade_frontalface_alt></opencv_storage>"#;
        let err = HaarCascade::from_xml(xml).unwrap_err();
        assert!(matches!(err, CascadeError::Unsupported(_)));
    }

    #[test]
    fn test_lbp_rejected() {
        let xml = EDGE_CASCADE.replace("<featureType>HAAR</featureType>", "<featureType>LBP</featureType>");
        let err = HaarCascade::from_xml(&xml).unwrap_err();
        assert!(matches!(err, CascadeError::Unsupported(_)));
    }

    #[test]
    fn test_tilted_rejected() {
        let xml = EDGE_CASCADE.replace("</rects></_></features>", "</rects><tilted>1</tilted></_></features>");
        let err = HaarCascade::from_xml(&xml).unwrap_err();
        assert!(matches!(err, CascadeError::Unsupported(_)));
    }

    #[test]
    fn test_feature_index_out_of_range() {
        let xml = EDGE_CASCADE.replace("0 -1 0 5.0000000000000000e-01", "0 -1 3 5.0000000000000000e-01");
        let err = HaarCascade::from_xml(&xml).unwrap_err();
        assert!(matches!(err, CascadeError::Format(_)));
    }

    #[test]
    fn test_rect_outside_window() {
        let xml = EDGE_CASCADE.replace("0 10 20 10 1.", "0 15 20 10 1.");
        let err = HaarCascade::from_xml(&xml).unwrap_err();
        assert!(matches!(err, CascadeError::Format(_)));
    }

    #[test]
    fn test_malformed_xml() {
        let err = HaarCascade::from_xml("<cascade><width>").unwrap_err();
        assert!(matches!(err, CascadeError::Xml(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = HaarCascade::load("/nonexistent/cascade.xml").unwrap_err();
        assert!(matches!(err, CascadeError::ModelNotFound(_)));
    }

    #[test]
    fn test_cache_shares_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edge.xml");
        std::fs::write(&path, EDGE_CASCADE).unwrap();

        let cache = CascadeCache::new(&path);
        assert!(!cache.is_loaded());

        let a = cache.get().unwrap();
        let b = cache.get().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(cache.is_loaded());

        drop(a);
        drop(b);
        assert!(!cache.is_loaded());

        // Reloads after teardown
        let c = cache.get().unwrap();
        assert_eq!(c.stage_count(), 1);
    }

    #[test]
    fn test_cache_missing_file_is_error() {
        let cache = CascadeCache::new("/nonexistent/cascade.xml");
        assert!(matches!(cache.get(), Err(CascadeError::ModelNotFound(_))));
        assert!(!cache.is_loaded());
    }
}

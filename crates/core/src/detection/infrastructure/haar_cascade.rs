//! Boosted Haar cascade in the OpenCV XML layout.
//!
//! Reads `<opencv_storage><cascade>` files as written by
//! `opencv_traincascade` (`stageType` BOOST, `featureType` HAAR) and
//! evaluates single windows over precomputed integral images. Multiscale
//! scanning lives in [`cascade_locator`](super::cascade_locator).

use std::str::FromStr;

use roxmltree::Node;
use thiserror::Error;

use crate::detection::infrastructure::integral_image::IntegralImages;

/// Subtracted from every stage threshold at load so sums that round just
/// below the trained threshold still pass.
const THRESHOLD_EPS: f32 = 1e-5;

#[derive(Error, Debug)]
pub enum CascadeLoadError {
    #[error("cascade is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("cascade is not well-formed XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("unsupported cascade format: {0}")]
    UnsupportedFormat(String),
    #[error("missing <{0}> element")]
    MissingElement(&'static str),
    #[error("invalid number {value:?} in <{element}>")]
    InvalidNumber { element: &'static str, value: String },
    #[error("invalid cascade structure: {0}")]
    InvalidStructure(String),
}

/// Outcome of running the cascade on one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowVerdict {
    Accepted,
    /// Rejected by the stage at this index.
    Rejected { stage: usize },
}

#[derive(Debug, Clone)]
struct Node4 {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f32,
}

#[derive(Debug, Clone)]
struct WeakTree {
    nodes: Vec<Node4>,
    leaves: Vec<f32>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f32,
    trees: Vec<WeakTree>,
}

#[derive(Debug, Clone, Copy)]
struct WeightedRect {
    x: i64,
    y: i64,
    width: i64,
    height: i64,
    weight: f32,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<WeightedRect>,
    tilted: bool,
}

/// A parsed, immutable Haar cascade classifier.
#[derive(Debug, Clone)]
pub struct CascadeClassifier {
    width: u32,
    height: u32,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
    has_tilted: bool,
}

impl CascadeClassifier {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CascadeLoadError> {
        Self::from_xml_str(std::str::from_utf8(bytes)?)
    }

    pub fn from_xml_str(xml: &str) -> Result<Self, CascadeLoadError> {
        let doc = roxmltree::Document::parse(xml)?;
        let root = doc.root_element();
        let cascade = match child(root, "cascade") {
            Some(c) => c,
            None => {
                let found = root
                    .children()
                    .find(|n| n.is_element())
                    .map(|n| n.tag_name().name().to_string())
                    .unwrap_or_else(|| root.tag_name().name().to_string());
                return Err(CascadeLoadError::UnsupportedFormat(format!(
                    "expected <cascade>, found <{found}>"
                )));
            }
        };

        let stage_type = text(cascade, "stageType")?;
        if stage_type != "BOOST" {
            return Err(CascadeLoadError::UnsupportedFormat(format!(
                "stage type {stage_type}"
            )));
        }
        let feature_type = text(cascade, "featureType")?;
        if feature_type != "HAAR" {
            return Err(CascadeLoadError::UnsupportedFormat(format!(
                "feature type {feature_type}"
            )));
        }

        let width: u32 = number(cascade, "width")?;
        let height: u32 = number(cascade, "height")?;
        if width < 2 || height < 2 {
            return Err(CascadeLoadError::InvalidStructure(format!(
                "window {width}x{height} is too small"
            )));
        }

        let features = parse_features(cascade)?;
        let stages = parse_stages(cascade)?;
        let classifier = Self {
            width,
            height,
            has_tilted: features.iter().any(|f| f.tilted),
            stages,
            features,
        };
        classifier.validate()?;
        Ok(classifier)
    }

    /// Training window `(width, height)`.
    pub fn window_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    /// Whether evaluation needs the rotated integral image.
    pub fn uses_tilted_features(&self) -> bool {
        self.has_tilted
    }

    /// Runs every stage on the window whose top-left corner is `(x, y)`.
    ///
    /// The window must lie inside the integral image.
    pub fn evaluate(&self, ii: &IntegralImages, x: usize, y: usize) -> WindowVerdict {
        let (w, h) = (self.width as usize, self.height as usize);
        debug_assert!(x + w <= ii.width() && y + h <= ii.height());

        // Variance normalisation over the window minus a 1px border.
        let (nw, nh) = (w.saturating_sub(2), h.saturating_sub(2));
        let area = (nw * nh) as f64;
        let sum = ii.rect_sum(x + 1, y + 1, nw, nh);
        let sqsum = ii.rect_sqsum(x + 1, y + 1, nw, nh);
        let nf = area * sqsum - sum * sum;
        let nf = if nf > 0.0 { nf.sqrt() } else { 1.0 };
        let inv_norm = 1.0 / nf;

        let feature_value = |idx: usize| -> f64 {
            let feature = &self.features[idx];
            let raw: f64 = feature
                .rects
                .iter()
                .map(|r| {
                    let s = if feature.tilted {
                        ii.tilted_sum(x as i64 + r.x, y as i64 + r.y, r.width, r.height)
                    } else {
                        ii.rect_sum(
                            x + r.x as usize,
                            y + r.y as usize,
                            r.width as usize,
                            r.height as usize,
                        )
                    };
                    r.weight as f64 * s
                })
                .sum();
            raw * inv_norm
        };

        for (si, stage) in self.stages.iter().enumerate() {
            let total: f64 = stage
                .trees
                .iter()
                .map(|tree| tree_output(tree, &feature_value))
                .sum();
            if total < stage.threshold as f64 {
                return WindowVerdict::Rejected { stage: si };
            }
        }
        WindowVerdict::Accepted
    }

    fn validate(&self) -> Result<(), CascadeLoadError> {
        if self.stages.is_empty() {
            return Err(CascadeLoadError::InvalidStructure("no stages".into()));
        }
        for (fi, f) in self.features.iter().enumerate() {
            if f.rects.is_empty() || f.rects.len() > 3 {
                return Err(CascadeLoadError::InvalidStructure(format!(
                    "feature {fi} has {} rects",
                    f.rects.len()
                )));
            }
            let (ww, wh) = (self.width as i64, self.height as i64);
            for r in &f.rects {
                let negative = r.x < 0 || r.y < 0 || r.width < 0 || r.height < 0;
                // A tilted rect hangs `height` columns left of its top
                // corner and spans `width + height` rows.
                let outside = if f.tilted {
                    r.x - r.height < 0 || r.x + r.width > ww || r.y + r.width + r.height > wh
                } else {
                    r.x + r.width > ww || r.y + r.height > wh
                };
                if negative || outside {
                    return Err(CascadeLoadError::InvalidStructure(format!(
                        "feature {fi} rect exceeds the {}x{} window",
                        self.width, self.height
                    )));
                }
            }
        }
        for (si, stage) in self.stages.iter().enumerate() {
            for tree in &stage.trees {
                if tree.nodes.is_empty() {
                    return Err(CascadeLoadError::InvalidStructure(format!(
                        "stage {si} has a tree without nodes"
                    )));
                }
                for node in &tree.nodes {
                    if node.feature >= self.features.len() {
                        return Err(CascadeLoadError::InvalidStructure(format!(
                            "stage {si} references feature {} of {}",
                            node.feature,
                            self.features.len()
                        )));
                    }
                    for child in [node.left, node.right] {
                        let in_range = if child > 0 {
                            (child as usize) < tree.nodes.len()
                        } else {
                            (child.unsigned_abs() as usize) < tree.leaves.len()
                        };
                        if !in_range {
                            return Err(CascadeLoadError::InvalidStructure(format!(
                                "stage {si} has a dangling tree index {child}"
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl FromStr for CascadeClassifier {
    type Err = CascadeLoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_xml_str(s)
    }
}

/// Walks one tree: left when `value < threshold`, until a leaf (index <= 0).
/// Bounded by the node count so a cyclic tree cannot loop forever.
fn tree_output(tree: &WeakTree, feature_value: &dyn Fn(usize) -> f64) -> f64 {
    let mut idx: i32 = 0;
    for _ in 0..tree.nodes.len() {
        let node = &tree.nodes[idx as usize];
        idx = if feature_value(node.feature) < node.threshold as f64 {
            node.left
        } else {
            node.right
        };
        if idx <= 0 {
            break;
        }
    }
    if idx > 0 {
        return 0.0;
    }
    tree.leaves[idx.unsigned_abs() as usize] as f64
}

// ---------------------------------------------------------------------------
// XML helpers
// ---------------------------------------------------------------------------

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn items<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(|n| n.is_element() && n.tag_name().name() == "_")
}

fn text<'a>(node: Node<'a, '_>, name: &'static str) -> Result<&'a str, CascadeLoadError> {
    child(node, name)
        .map(|n| n.text().unwrap_or("").trim())
        .ok_or(CascadeLoadError::MissingElement(name))
}

fn number<T: FromStr>(node: Node<'_, '_>, name: &'static str) -> Result<T, CascadeLoadError> {
    let raw = text(node, name)?;
    parse_token(raw, name)
}

fn parse_token<T: FromStr>(raw: &str, element: &'static str) -> Result<T, CascadeLoadError> {
    raw.parse().map_err(|_| CascadeLoadError::InvalidNumber {
        element,
        value: raw.to_string(),
    })
}

fn tokens<'a>(node: Node<'a, '_>) -> impl Iterator<Item = &'a str> {
    node.text().unwrap_or("").split_whitespace()
}

fn parse_stages(cascade: Node<'_, '_>) -> Result<Vec<Stage>, CascadeLoadError> {
    let stages = child(cascade, "stages").ok_or(CascadeLoadError::MissingElement("stages"))?;
    items(stages)
        .map(|stage| -> Result<Stage, CascadeLoadError> {
            let threshold = number::<f32>(stage, "stageThreshold")? - THRESHOLD_EPS;
            let weak = child(stage, "weakClassifiers")
                .ok_or(CascadeLoadError::MissingElement("weakClassifiers"))?;
            let trees = items(weak).map(parse_tree).collect::<Result<Vec<_>, _>>()?;
            Ok(Stage { threshold, trees })
        })
        .collect()
}

fn parse_tree(weak: Node<'_, '_>) -> Result<WeakTree, CascadeLoadError> {
    let internal =
        child(weak, "internalNodes").ok_or(CascadeLoadError::MissingElement("internalNodes"))?;
    let raw: Vec<&str> = tokens(internal).collect();
    if raw.len() % 4 != 0 {
        return Err(CascadeLoadError::InvalidStructure(format!(
            "internalNodes has {} values, expected groups of 4",
            raw.len()
        )));
    }
    let nodes = raw
        .chunks(4)
        .map(|c| -> Result<Node4, CascadeLoadError> {
            Ok(Node4 {
                left: parse_token(c[0], "internalNodes")?,
                right: parse_token(c[1], "internalNodes")?,
                feature: parse_token(c[2], "internalNodes")?,
                threshold: parse_token(c[3], "internalNodes")?,
            })
        })
        .collect::<Result<Vec<_>, CascadeLoadError>>()?;

    let leaf_node = child(weak, "leafValues").ok_or(CascadeLoadError::MissingElement("leafValues"))?;
    let leaves = tokens(leaf_node)
        .map(|t| parse_token(t, "leafValues"))
        .collect::<Result<Vec<f32>, _>>()?;

    Ok(WeakTree { nodes, leaves })
}

fn parse_features(cascade: Node<'_, '_>) -> Result<Vec<HaarFeature>, CascadeLoadError> {
    let features = child(cascade, "features").ok_or(CascadeLoadError::MissingElement("features"))?;
    items(features)
        .map(|feature| -> Result<HaarFeature, CascadeLoadError> {
            let rects_node = child(feature, "rects").ok_or(CascadeLoadError::MissingElement("rects"))?;
            let rects = items(rects_node)
                .map(|r| -> Result<WeightedRect, CascadeLoadError> {
                    let values: Vec<&str> = tokens(r).collect();
                    if values.len() != 5 {
                        return Err(CascadeLoadError::InvalidStructure(format!(
                            "rect has {} values, expected 5",
                            values.len()
                        )));
                    }
                    Ok(WeightedRect {
                        x: parse_token(values[0], "rects")?,
                        y: parse_token(values[1], "rects")?,
                        width: parse_token(values[2], "rects")?,
                        height: parse_token(values[3], "rects")?,
                        weight: parse_token(values[4], "rects")?,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let tilted = match child(feature, "tilted") {
                Some(_) => number::<i32>(feature, "tilted")? != 0,
                None => false,
            };
            Ok(HaarFeature { rects, tilted })
        })
        .collect()
}

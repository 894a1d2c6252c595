use crate::annotations::detection::{Detection, Shape};
use crate::object_detection::object_detection_model::ScoredShape;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Reads a file with the class names into a vector so that the number ids
/// which come directly from the ORT inference session can be given meaning.
///
/// Blank lines are skipped.
pub fn read_classes_txt_file(filepath: &Path) -> io::Result<Vec<String>> {
    let lines: Vec<String> = BufReader::new(File::open(filepath)?)
        .lines()
        .collect::<io::Result<_>>()?;
    Ok(lines
        .into_iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}

/// Anything non maximum suppression can rank and compare.
pub trait Suppressible {
    fn confidence(&self) -> f32;
    /// Only items of the same category suppress each other.
    fn same_category(&self, other: &Self) -> bool;
    fn intersection_over_union(&self, other: &Self) -> f64;
}

impl Suppressible for ScoredShape {
    fn confidence(&self) -> f32 {
        self.confidence
    }

    fn same_category(&self, other: &Self) -> bool {
        self.class_id == other.class_id
    }

    fn intersection_over_union(&self, other: &Self) -> f64 {
        match (&self.shape, &other.shape) {
            (Shape::AxisAligned { .. }, Shape::AxisAligned { .. }) => self
                .shape
                .to_quad()
                .bounding_box()
                .intersection_over_union(&other.shape.to_quad().bounding_box()),
            _ => self.shape.to_quad().intersection_over_union(&other.shape.to_quad()),
        }
    }
}

impl Suppressible for Detection {
    fn confidence(&self) -> f32 {
        self.confidence
    }

    fn same_category(&self, other: &Self) -> bool {
        self.class_name == other.class_name
    }

    fn intersection_over_union(&self, other: &Self) -> f64 {
        self.polygon.intersection_over_union(&other.polygon)
    }
}

/// Flags the items a greedy, highest-confidence-first suppression removes.
fn suppression_mask<T: Suppressible>(items: &[T], iou_threshold: f32) -> Vec<bool> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| items[b].confidence().total_cmp(&items[a].confidence()));
    let mut remove = vec![false; items.len()];
    for (rank, &current) in order.iter().enumerate() {
        if remove[current] {
            continue;
        }
        for &other in &order[rank + 1..] {
            if remove[other] || !items[current].same_category(&items[other]) {
                continue;
            }
            if items[current].intersection_over_union(&items[other]) > iou_threshold as f64 {
                remove[other] = true;
            }
        }
    }
    remove
}

/// Non maxmimum suppression is a way of removing duplicate detections.
///
/// Survivors are returned sorted by descending confidence, which is how detection models
/// order their output.
pub fn non_maximum_suppression<T: Suppressible>(mut items: Vec<T>, iou_threshold: f32) -> Vec<T> {
    items.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));
    let remove = suppression_mask(&items, iou_threshold);
    let mut drop_iter = remove.into_iter();
    items.retain(|_| !drop_iter.next().unwrap_or(false));
    items
}

/// Same suppression, but survivors keep their original relative order.
pub fn suppress_keeping_order<T: Suppressible>(mut items: Vec<T>, iou_threshold: f32) -> Vec<T> {
    let remove = suppression_mask(&items, iou_threshold);
    let mut drop_iter = remove.into_iter();
    items.retain(|_| !drop_iter.next().unwrap_or(false));
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::point::Point;
    use crate::annotations::polygon::Quad;

    fn det(left: f64, top: f64, right: f64, bottom: f64, class: &str, confidence: f32) -> Detection {
        Detection::new(
            class.to_string(),
            confidence,
            Quad::from_corners(Point::new(left, top), Point::new(right, bottom)),
        )
    }

    #[test]
    fn nms_no_overlap() {
        let dets = vec![det(0., 0., 1., 1., "test", 0.6), det(2., 2., 3., 3., "test", 0.6)];
        let nms_result = non_maximum_suppression(dets.clone(), 0.5);
        assert_eq!(dets, nms_result);
    }

    #[test]
    fn nms_standard_usage() {
        let dets = vec![
            det(0., 0., 4., 4., "test", 0.6),
            det(0., 0., 5., 5., "test", 0.55),
            det(6., 6., 10., 10., "test", 0.75),
        ];
        let nms_result = non_maximum_suppression(dets, 0.5);
        let true_dets = vec![det(6., 6., 10., 10., "test", 0.75), det(0., 0., 4., 4., "test", 0.6)];
        assert_eq!(true_dets, nms_result);
    }

    #[test]
    fn nms_overlap_but_different_classes() {
        let dets = vec![
            det(0., 0., 4.5, 4.5, "test", 0.6),
            det(0., 0., 5., 5., "test_different_class", 0.55),
            det(0.5, 0.5, 4., 4., "test", 0.8),
            det(6., 6., 10., 10., "test", 0.75),
        ];
        let nms_result = non_maximum_suppression(dets, 0.5);
        let true_dets = vec![
            det(0.5, 0.5, 4., 4., "test", 0.8),
            det(6., 6., 10., 10., "test", 0.75),
            det(0., 0., 5., 5., "test_different_class", 0.55),
        ];
        assert_eq!(true_dets, nms_result);
    }

    #[test]
    fn order_preserving_suppression() {
        let dets = vec![
            det(0., 0., 4., 4., "test", 0.5),
            det(20., 20., 24., 24., "test", 0.3),
            det(0., 0., 4.2, 4.2, "test", 0.9),
        ];
        let kept = suppress_keeping_order(dets, 0.5);
        assert_eq!(
            kept,
            vec![det(20., 20., 24., 24., "test", 0.3), det(0., 0., 4.2, 4.2, "test", 0.9)]
        );
    }

    #[test]
    fn scored_shapes_suppress_by_class_id() {
        let shape = Shape::AxisAligned {
            min: Point::new(0.0, 0.0),
            max: Point::new(10.0, 10.0),
        };
        let shapes = vec![
            ScoredShape { shape, confidence: 0.9, class_id: 0 },
            ScoredShape { shape, confidence: 0.8, class_id: 0 },
            ScoredShape { shape, confidence: 0.7, class_id: 1 },
        ];
        let kept = non_maximum_suppression(shapes, 0.45);
        let ids: Vec<usize> = kept.iter().map(|s| s.class_id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn reads_class_names() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("classes.txt");
        std::fs::write(&path, "plane\nship\n\nstorage-tank\n").unwrap();
        assert_eq!(
            read_classes_txt_file(&path).unwrap(),
            vec!["plane", "ship", "storage-tank"]
        );
    }
}

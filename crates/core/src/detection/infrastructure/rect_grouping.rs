//! Merges overlapping raw cascade hits into final detections.
//!
//! Hits are clustered by similarity (corners within `eps` of the mean
//! size), each cluster is averaged, clusters with too few members are
//! dropped, and a cluster lying inside a stronger one is suppressed.

use crate::detection::infrastructure::math::{class_labels, round_even, union};
use crate::shared::rect::Rect;

/// Whether two hits belong to the same object.
pub fn similar(a: &Rect, b: &Rect, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    ((a.x - b.x) as f64).abs() <= delta
        && ((a.y - b.y) as f64).abs() <= delta
        && ((a.right() - b.right()) as f64).abs() <= delta
        && ((a.bottom() - b.bottom()) as f64).abs() <= delta
}

/// Groups `rects`, keeping clusters with more than `min_neighbors` members.
///
/// `min_neighbors == 0` returns the input unchanged.
pub fn group_rectangles(rects: &[Rect], min_neighbors: u32, eps: f64) -> Vec<Rect> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                union(&mut parent, i, j);
            }
        }
    }
    let (labels, classes) = class_labels(&mut parent);

    let mut sums = vec![[0i64; 4]; classes];
    let mut counts = vec![0u32; classes];
    for (r, &label) in rects.iter().zip(&labels) {
        let s = &mut sums[label];
        s[0] += r.x as i64;
        s[1] += r.y as i64;
        s[2] += r.width as i64;
        s[3] += r.height as i64;
        counts[label] += 1;
    }

    let averaged: Vec<Rect> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &count)| {
            let inv = 1.0 / count as f64;
            Rect::new(
                round_even(s[0] as f64 * inv),
                round_even(s[1] as f64 * inv),
                round_even(s[2] as f64 * inv),
                round_even(s[3] as f64 * inv),
            )
        })
        .collect();

    let mut kept = Vec::new();
    for i in 0..classes {
        let n1 = counts[i];
        if n1 <= min_neighbors {
            continue;
        }
        let r1 = averaged[i];
        let swallowed = (0..classes).any(|j| {
            let n2 = counts[j];
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let r2 = averaged[j];
            let dx = round_even(r2.width as f64 * eps);
            let dy = round_even(r2.height as f64 * eps);
            r1.x >= r2.x - dx
                && r1.y >= r2.y - dy
                && r1.right() <= r2.right() + dx
                && r1.bottom() <= r2.bottom() + dy
                && (n2 > n1.max(3) || n1 < 3)
        });
        if !swallowed {
            kept.push(r1);
        }
    }
    kept
}

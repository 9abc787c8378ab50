//! Shared math utilities for the cascade runtime.
//!
//! Provides union-find clustering and the rounding rule used when mapping
//! scaled coordinates back to the source image.

/// Find root of element `i` with path halving for amortized near-O(1).
pub fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Merge the sets containing `a` and `b`.
pub fn union(parent: &mut [usize], a: usize, b: usize) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        parent[ra] = rb;
    }
}

/// Dense class label per element, numbered in order of first appearance.
///
/// Returns `(labels, class_count)`.
pub fn class_labels(parent: &mut [usize]) -> (Vec<usize>, usize) {
    let n = parent.len();
    let mut root_label = vec![usize::MAX; n];
    let mut labels = Vec::with_capacity(n);
    let mut count = 0;
    for i in 0..n {
        let root = find(parent, i);
        if root_label[root] == usize::MAX {
            root_label[root] = count;
            count += 1;
        }
        labels.push(root_label[root]);
    }
    (labels, count)
}

/// Round to nearest integer, ties to even (the default FPU rounding mode).
pub fn round_even(value: f64) -> i32 {
    let floor = value.floor();
    let diff = value - floor;
    let rounded = if diff > 0.5 {
        floor + 1.0
    } else if diff < 0.5 {
        floor
    } else if floor % 2.0 == 0.0 {
        floor
    } else {
        floor + 1.0
    };
    rounded as i32
}

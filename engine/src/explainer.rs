//! Exact path-dependent TreeSHAP (Lundberg et al., "Consistent Individualized
//! Feature Attribution for Tree Ensembles", algorithm 2).
//!
//! Attributions live in margin space: for every input,
//! `expected_value + sum(phi) == booster.predict_margin(x)`.

use crate::{
    booster::{Booster, Node, Tree},
    error::AppError,
};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    pweight: f64,
}

pub struct TreeExplainer {
    booster: Arc<Booster>,
    expected_value: f64,
}

impl TreeExplainer {
    pub fn new(booster: Arc<Booster>) -> Self {
        let expected_value = booster.base_margin()
            + booster
                .trees()
                .iter()
                .map(Tree::expected_value)
                .sum::<f64>();
        Self {
            booster,
            expected_value,
        }
    }

    pub fn expected_value(&self) -> f64 {
        self.expected_value
    }

    pub fn shap_values(&self, x: &[f64]) -> Result<Vec<f64>, AppError> {
        let width = self.booster.num_features();
        if x.len() != width {
            return Err(AppError::Attribution(format!(
                "explainer expects {} features, got {}",
                width,
                x.len()
            )));
        }

        let mut phi = vec![0.0; width];
        for tree in self.booster.trees() {
            recurse(tree, x, &mut phi, 0, &[], 0, 1.0, 1.0, None);
        }

        if let Some(i) = phi.iter().position(|v| !v.is_finite()) {
            return Err(AppError::Attribution(format!(
                "non-finite attribution at position {}",
                i
            )));
        }
        Ok(phi)
    }
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    tree: &Tree,
    x: &[f64],
    phi: &mut [f64],
    node: usize,
    parent_path: &[PathElement],
    mut unique_depth: usize,
    parent_zero_fraction: f64,
    parent_one_fraction: f64,
    parent_feature: Option<usize>,
) {
    let mut path = Vec::with_capacity(unique_depth + 2);
    path.extend_from_slice(&parent_path[..unique_depth]);
    path.push(PathElement::default());
    extend_path(
        &mut path,
        unique_depth,
        parent_zero_fraction,
        parent_one_fraction,
        parent_feature,
    );

    let (feature, threshold, left, right, default_left, cover) = match tree.node(node) {
        Node::Leaf { value, .. } => {
            for i in 1..=unique_depth {
                let w = unwound_path_sum(&path, unique_depth, i);
                let el = path[i];
                if let Some(f) = el.feature {
                    phi[f] += w * (el.one_fraction - el.zero_fraction) * value;
                }
            }
            return;
        }
        Node::Split {
            feature,
            threshold,
            left,
            right,
            default_left,
            cover,
        } => (*feature, *threshold, *left, *right, *default_left, *cover),
    };

    let hot = Tree::next(x, feature, threshold, left, right, default_left);
    let cold = if hot == left { right } else { left };
    let hot_zero_fraction = tree.node(hot).cover() / cover;
    let cold_zero_fraction = tree.node(cold).cover() / cover;
    let mut incoming_zero_fraction = 1.0;
    let mut incoming_one_fraction = 1.0;

    // A feature seen earlier on this path is undone before splitting again.
    if let Some(k) = (1..=unique_depth).find(|&k| path[k].feature == Some(feature)) {
        incoming_zero_fraction = path[k].zero_fraction;
        incoming_one_fraction = path[k].one_fraction;
        unwind_path(&mut path, unique_depth, k);
        unique_depth -= 1;
    }

    recurse(
        tree,
        x,
        phi,
        hot,
        &path,
        unique_depth + 1,
        hot_zero_fraction * incoming_zero_fraction,
        incoming_one_fraction,
        Some(feature),
    );
    recurse(
        tree,
        x,
        phi,
        cold,
        &path,
        unique_depth + 1,
        cold_zero_fraction * incoming_zero_fraction,
        0.0,
        Some(feature),
    );
}

fn extend_path(
    path: &mut [PathElement],
    unique_depth: usize,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    path[unique_depth] = PathElement {
        feature,
        zero_fraction,
        one_fraction,
        pweight: if unique_depth == 0 { 1.0 } else { 0.0 },
    };
    let d = unique_depth as f64;
    for i in (0..unique_depth).rev() {
        let fi = i as f64;
        path[i + 1].pweight += one_fraction * path[i].pweight * (fi + 1.0) / (d + 1.0);
        path[i].pweight = zero_fraction * path[i].pweight * (d - fi) / (d + 1.0);
    }
}

fn unwind_path(path: &mut [PathElement], unique_depth: usize, path_index: usize) {
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let d = unique_depth as f64;
    let mut next_one_portion = path[unique_depth].pweight;

    for i in (0..unique_depth).rev() {
        let fi = i as f64;
        if one_fraction != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next_one_portion * (d + 1.0) / ((fi + 1.0) * one_fraction);
            next_one_portion = tmp - path[i].pweight * zero_fraction * (d - fi) / (d + 1.0);
        } else {
            path[i].pweight = path[i].pweight * (d + 1.0) / (zero_fraction * (d - fi));
        }
    }

    for i in path_index..unique_depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
}

fn unwound_path_sum(path: &[PathElement], unique_depth: usize, path_index: usize) -> f64 {
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let d = unique_depth as f64;
    let mut next_one_portion = path[unique_depth].pweight;
    let mut total = 0.0;

    if one_fraction != 0.0 {
        for i in (0..unique_depth).rev() {
            let fi = i as f64;
            let tmp = next_one_portion / ((fi + 1.0) * one_fraction);
            total += tmp;
            next_one_portion = path[i].pweight - tmp * zero_fraction * (d - fi);
        }
    } else if zero_fraction != 0.0 {
        for i in (0..unique_depth).rev() {
            total += path[i].pweight / (zero_fraction * (d - i as f64));
        }
    }
    total * (d + 1.0)
}

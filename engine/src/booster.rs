//! Gradient-boosted tree ensemble read from the XGBoost JSON model format
//! (`Booster.save_model("model.json")`). Only the `gbtree` booster with a
//! binary logistic objective is supported.

use crate::{
    error::{schema_error, AppError},
    features::Vocabulary,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ModelFile {
    learner: LearnerJson,
}

#[derive(Debug, Deserialize)]
struct LearnerJson {
    #[serde(default)]
    feature_names: Vec<String>,
    gradient_booster: GradientBoosterJson,
    learner_model_param: LearnerModelParam,
    objective: ObjectiveJson,
}

#[derive(Debug, Deserialize)]
struct GradientBoosterJson {
    name: String,
    model: GbTreeJson,
}

#[derive(Debug, Deserialize)]
struct GbTreeJson {
    trees: Vec<TreeJson>,
}

// XGBoost writes its scalar params as strings.
#[derive(Debug, Deserialize)]
struct LearnerModelParam {
    base_score: String,
    #[serde(default)]
    num_class: Option<String>,
    num_feature: String,
}

#[derive(Debug, Deserialize)]
struct ObjectiveJson {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TreeJson {
    left_children: Vec<i32>,
    right_children: Vec<i32>,
    split_indices: Vec<i64>,
    split_conditions: Vec<f64>,
    default_left: Vec<Flag>,
    sum_hessian: Vec<f64>,
}

// Older exports write booleans, newer ones 0/1.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    fn is_set(&self) -> bool {
        match self {
            Flag::Bool(b) => *b,
            Flag::Int(i) => *i != 0,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
        default_left: bool,
        cover: f64,
    },
    Leaf {
        value: f64,
        cover: f64,
    },
}

impl Node {
    pub(crate) fn cover(&self) -> f64 {
        match self {
            Node::Split { cover, .. } | Node::Leaf { cover, .. } => *cover,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub(crate) fn node(&self, id: usize) -> &Node {
        &self.nodes[id]
    }

    /// Child taken by `x` at a split. Comparison happens in f32, like the
    /// trainer; NaN follows the default direction.
    pub(crate) fn next(
        x: &[f64],
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
        default_left: bool,
    ) -> usize {
        let v = x[feature] as f32;
        if v.is_nan() {
            if default_left {
                left
            } else {
                right
            }
        } else if v < threshold {
            left
        } else {
            right
        }
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { value, .. } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    default_left,
                    ..
                } => id = Self::next(x, *feature, *threshold, *left, *right, *default_left),
            }
        }
    }

    /// Cover-weighted mean leaf value.
    pub fn expected_value(&self) -> f64 {
        self.expected_from(0)
    }

    fn expected_from(&self, id: usize) -> f64 {
        match &self.nodes[id] {
            Node::Leaf { value, .. } => *value,
            Node::Split {
                left, right, cover, ..
            } => {
                let l = self.nodes[*left].cover();
                let r = self.nodes[*right].cover();
                (l * self.expected_from(*left) + r * self.expected_from(*right)) / cover
            }
        }
    }

    fn from_json(tree: TreeJson, num_features: usize, index: usize) -> Result<Self, AppError> {
        let n = tree.left_children.len();
        let consistent = [
            tree.right_children.len(),
            tree.split_indices.len(),
            tree.split_conditions.len(),
            tree.default_left.len(),
            tree.sum_hessian.len(),
        ]
        .iter()
        .all(|len| *len == n);
        if n == 0 || !consistent {
            return Err(schema_error(format!("tree {} has inconsistent node arrays", index)));
        }

        let child = |c: i32, parent: usize| -> Result<usize, AppError> {
            usize::try_from(c)
                .ok()
                .filter(|c| *c < n && *c > parent)
                .ok_or_else(|| {
                    schema_error(format!("tree {} node {} has invalid child {}", index, parent, c))
                })
        };

        let mut nodes = Vec::with_capacity(n);
        for i in 0..n {
            let cover = tree.sum_hessian[i];
            if tree.left_children[i] == -1 {
                nodes.push(Node::Leaf {
                    value: tree.split_conditions[i],
                    cover,
                });
                continue;
            }
            let feature = usize::try_from(tree.split_indices[i])
                .ok()
                .filter(|f| *f < num_features)
                .ok_or_else(|| {
                    schema_error(format!(
                        "tree {} node {} splits on feature {} of {}",
                        index, i, tree.split_indices[i], num_features
                    ))
                })?;
            nodes.push(Node::Split {
                feature,
                threshold: tree.split_conditions[i] as f32,
                left: child(tree.left_children[i], i)?,
                right: child(tree.right_children[i], i)?,
                default_left: tree.default_left[i].is_set(),
                cover,
            });
        }

        Ok(Self { nodes })
    }
}

#[derive(Debug, Clone)]
pub struct Booster {
    feature_names: Option<Vocabulary>,
    num_features: usize,
    base_margin: f64,
    trees: Vec<Tree>,
}

impl Booster {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, AppError> {
        let file: ModelFile = serde_json::from_slice(bytes)?;
        Self::from_learner(file.learner)
    }

    fn from_learner(learner: LearnerJson) -> Result<Self, AppError> {
        if learner.gradient_booster.name != "gbtree" {
            return Err(schema_error(format!(
                "unsupported booster '{}'",
                learner.gradient_booster.name
            )));
        }
        let objective = learner.objective.name.as_str();
        if objective != "binary:logistic" && objective != "reg:logistic" {
            return Err(schema_error(format!("unsupported objective '{}'", objective)));
        }

        let params = &learner.learner_model_param;
        let num_class = params
            .num_class
            .as_deref()
            .map(parse_param)
            .transpose()?
            .unwrap_or(0.0);
        if num_class > 1.0 {
            return Err(schema_error("multi-class models are not supported"));
        }
        let num_features = parse_param(&params.num_feature)? as usize;
        let base_score = parse_param(&params.base_score)?;
        if !(base_score > 0.0 && base_score < 1.0) {
            return Err(schema_error(format!("base_score {} is not a probability", base_score)));
        }

        let feature_names = if learner.feature_names.is_empty() {
            None
        } else {
            if learner.feature_names.len() != num_features {
                return Err(schema_error(format!(
                    "model declares {} features but names {}",
                    num_features,
                    learner.feature_names.len()
                )));
            }
            Some(Vocabulary::new(learner.feature_names).map_err(schema_error)?)
        };

        let trees = learner
            .gradient_booster
            .model
            .trees
            .into_iter()
            .enumerate()
            .map(|(i, t)| Tree::from_json(t, num_features, i))
            .collect::<Result<Vec<_>, _>>()?;
        if trees.is_empty() {
            return Err(schema_error("model contains no trees"));
        }

        Ok(Self {
            feature_names,
            num_features,
            base_margin: logit(base_score),
            trees,
        })
    }

    pub fn feature_names(&self) -> Option<&Vocabulary> {
        self.feature_names.as_ref()
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn base_margin(&self) -> f64 {
        self.base_margin
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    fn check_width(&self, x: &[f64]) -> Result<(), AppError> {
        if x.len() != self.num_features {
            return Err(AppError::Prediction(format!(
                "model expects {} features, got {}",
                self.num_features,
                x.len()
            )));
        }
        Ok(())
    }

    pub fn predict_margin(&self, x: &[f64]) -> Result<f64, AppError> {
        self.check_width(x)?;
        Ok(self.base_margin + self.trees.iter().map(|t| t.predict(x)).sum::<f64>())
    }

    pub fn predict_proba(&self, x: &[f64]) -> Result<f64, AppError> {
        let margin = self.predict_margin(x)?;
        let p = sigmoid(margin);
        if p.is_nan() {
            return Err(AppError::Prediction("model produced NaN".to_string()));
        }
        Ok(p)
    }
}

/// Parses "0.5", "5E-1" or "[5E-1]".
fn parse_param(raw: &str) -> Result<f64, AppError> {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<f64>()
        .map_err(|e| schema_error(format!("bad model parameter '{}': {}", raw, e)))
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

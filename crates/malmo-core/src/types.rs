use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Free-form info mapping returned alongside observations.
pub type Info = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Space
// ---------------------------------------------------------------------------

/// Element type of a [`Space::Box`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxDtype {
    #[default]
    Float,
    Int,
}

/// Capability description of one action or observation field.
///
/// Follows the Gymnasium/MineRL conventions: a named enumeration, a bounded
/// box of numbers, or a mapping of named sub-spaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Space {
    Enum {
        values: Vec<String>,
    },
    Box {
        low: f64,
        high: f64,
        #[serde(default)]
        shape: Vec<usize>,
        #[serde(default)]
        dtype: BoxDtype,
    },
    Dict {
        #[serde(default)]
        spaces: BTreeMap<String, Self>,
    },
}

impl Default for Space {
    fn default() -> Self {
        Self::Dict {
            spaces: BTreeMap::new(),
        }
    }
}

impl Space {
    /// Enumeration over the given members.
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enum {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Float box with uniform bounds.
    pub fn boxed(low: f64, high: f64, shape: &[usize]) -> Self {
        Self::Box {
            low,
            high,
            shape: shape.to_vec(),
            dtype: BoxDtype::Float,
        }
    }

    /// Scalar integer box, e.g. an inventory count.
    pub const fn count(high: f64) -> Self {
        Self::Box {
            low: 0.0,
            high,
            shape: Vec::new(),
            dtype: BoxDtype::Int,
        }
    }

    /// Mapping from field names to sub-spaces.
    pub fn dict<I, S>(spaces: I) -> Self
    where
        I: IntoIterator<Item = (S, Self)>,
        S: Into<String>,
    {
        Self::Dict {
            spaces: spaces.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Sub-spaces of a mapping; `None` for leaf spaces.
    pub const fn spaces(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Dict { spaces } => Some(spaces),
            _ => None,
        }
    }

    /// Look up a named sub-space of a mapping.
    pub fn get(&self, field: &str) -> Option<&Self> {
        self.spaces().and_then(|s| s.get(field))
    }

    /// A structurally valid, zero-valued sample of this space.
    ///
    /// Boxes yield zeros in their declared shape, enumerations yield their
    /// first member, and mappings are zeroed recursively. Observation fields
    /// the backend leaves out are filled with this value so that callers see
    /// a stable structure on every step.
    pub fn zeroed_sample(&self) -> Value {
        match self {
            Self::Enum { values } => Value::String(values.first().cloned().unwrap_or_default()),
            Self::Box { shape, dtype, .. } => {
                let zero = match dtype {
                    BoxDtype::Float => Value::from(0.0),
                    BoxDtype::Int => Value::from(0),
                };
                fill_shape(shape, &zero)
            }
            Self::Dict { spaces } => Value::Object(
                spaces
                    .iter()
                    .map(|(k, v)| (k.clone(), v.zeroed_sample()))
                    .collect(),
            ),
        }
    }

    /// Number of scalar elements in a box shape (1 for scalars).
    pub fn element_count(&self) -> usize {
        match self {
            Self::Box { shape, .. } => shape.iter().product(),
            Self::Enum { .. } => 1,
            Self::Dict { spaces } => spaces.values().map(Self::element_count).sum(),
        }
    }

    /// Sample a random action value. Takes `&mut impl Rng` for determinism.
    ///
    /// Returns `None` for mappings; sample each sub-space individually.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn sample_value(&self, rng: &mut impl rand::Rng) -> Option<ActionValue> {
        match self {
            Self::Enum { values } if values.is_empty() => None,
            Self::Enum { values } => Some(ActionValue::Index(rng.gen_range(0..values.len()) as i64)),
            Self::Box {
                low,
                high,
                shape,
                dtype,
            } => {
                let mut draw = || {
                    let v = if low < high && low.is_finite() && high.is_finite() {
                        rng.gen_range(*low..=*high)
                    } else {
                        *low
                    };
                    match dtype {
                        BoxDtype::Float => v,
                        BoxDtype::Int => v.round(),
                    }
                };
                if shape.is_empty() {
                    Some(ActionValue::Number(draw()))
                } else {
                    let n: usize = shape.iter().product();
                    Some(ActionValue::Numbers((0..n).map(|_| draw()).collect()))
                }
            }
            Self::Dict { .. } => None,
        }
    }
}

fn fill_shape(shape: &[usize], zero: &Value) -> Value {
    match shape.split_first() {
        None => zero.clone(),
        Some((n, rest)) => Value::Array((0..*n).map(|_| fill_shape(rest, zero)).collect()),
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Value of one action field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionValue {
    /// Enumeration index (or an integer for a box field).
    Index(i64),
    Number(f64),
    Numbers(Vec<f64>),
    /// Exact enumeration member.
    Text(String),
}

impl From<i64> for ActionValue {
    fn from(v: i64) -> Self {
        Self::Index(v)
    }
}

impl From<i32> for ActionValue {
    fn from(v: i32) -> Self {
        Self::Index(i64::from(v))
    }
}

impl From<f64> for ActionValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<Vec<f64>> for ActionValue {
    fn from(v: Vec<f64>) -> Self {
        Self::Numbers(v)
    }
}

impl From<&str> for ActionValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for ActionValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Ordered mapping of action field names to values.
///
/// Fields keep insertion order; the encoded command lists them in that order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Action {
    fields: Vec<(String, ActionValue)>,
}

impl Action {
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Builder: set a field.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<ActionValue>) -> Self {
        self.insert(field, value);
        self
    }

    /// Set a field, replacing an earlier value in place.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<ActionValue>) {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field, value)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&ActionValue> {
        self.fields.iter().find(|(k, _)| k == field).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ActionValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub const fn len(&self) -> usize {
        self.fields.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Random action covering every leaf field of a mapping space.
    pub fn sample(space: &Space, rng: &mut impl rand::Rng) -> Self {
        let mut action = Self::new();
        if let Some(spaces) = space.spaces() {
            for (name, sub) in spaces {
                if let Some(value) = sub.sample_value(rng) {
                    action.insert(name.clone(), value);
                }
            }
        }
        action
    }
}

impl<K: Into<String>, V: Into<ActionValue>> FromIterator<(K, V)> for Action {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut action = Self::new();
        for (k, v) in iter {
            action.insert(k, v);
        }
        action
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Video frame dimensions negotiated from the mission's `VideoProducer`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl FrameGeometry {
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Bytes in one frame.
    pub const fn len(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(height, width, depth)`.
    pub const fn shape(&self) -> [usize; 3] {
        [
            self.height as usize,
            self.width as usize,
            self.depth as usize,
        ]
    }
}

/// Row-major `height x width x depth` byte image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    geometry: FrameGeometry,
    data: Vec<u8>,
}

impl Frame {
    /// All-zero frame.
    pub fn zeros(geometry: FrameGeometry) -> Self {
        Self {
            geometry,
            data: vec![0; geometry.len()],
        }
    }

    /// Wrap raw bytes, which must match the geometry exactly.
    pub fn from_bytes(geometry: FrameGeometry, data: Vec<u8>) -> Result<Self, ProtocolError> {
        if data.len() != geometry.len() {
            return Err(ProtocolError::FrameSize {
                expected: geometry.len(),
                got: data.len(),
            });
        }
        Ok(Self { geometry, data })
    }

    pub const fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    /// `(height, width, depth)`.
    pub const fn shape(&self) -> [usize; 3] {
        self.geometry.shape()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Channel value at `(row, col, channel)`.
    pub fn get(&self, row: usize, col: usize, channel: usize) -> Option<u8> {
        let [h, w, d] = self.shape();
        if row >= h || col >= w || channel >= d {
            return None;
        }
        self.data.get((row * w + col) * d + channel).copied()
    }
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// Decoded observation: the point-of-view frame plus declared fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub pov: Frame,
    pub fields: BTreeMap<String, Value>,
}

impl Observation {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

// ---------------------------------------------------------------------------
// StepResult / ResetResult
// ---------------------------------------------------------------------------

/// Result of `env.step(action)`.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub observation: Observation,
    pub reward: f64,
    pub done: bool,
    pub info: Info,
}

/// Result of `env.reset()`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResetResult {
    pub observation: Observation,
    pub info: Info,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

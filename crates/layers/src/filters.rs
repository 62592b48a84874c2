//! Filters a tile layer can apply to its composite.

use gpu::backend::{FilterKind, FilterSpec};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ParamControl {
    Slider,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FilterParam {
    pub display_name: &'static str,
    pub name: &'static str,
    pub control: ParamControl,
    pub range: (f64, f64),
    pub default: f64,
}

const BLUR_PARAMS: &[FilterParam] = &[
    FilterParam {
        display_name: "Width (px)",
        name: "blurX",
        control: ParamControl::Slider,
        range: (0.0, 32.0),
        default: 2.0,
    },
    FilterParam {
        display_name: "Height (px)",
        name: "blurY",
        control: ParamControl::Slider,
        range: (0.0, 32.0),
        default: 2.0,
    },
];

const INVERT_PARAMS: &[FilterParam] = &[FilterParam {
    display_name: "Strength",
    name: "invert",
    control: ParamControl::Slider,
    range: (0.0, 1.0),
    default: 1.0,
}];

pub fn filter_params(kind: FilterKind) -> &'static [FilterParam] {
    match kind {
        FilterKind::GaussianBlur => BLUR_PARAMS,
        FilterKind::Invert => INVERT_PARAMS,
    }
}

/// Filters offered by a backend. Empty means the backend cannot filter at
/// all, not that no filter is configured.
pub fn available_filters(backend_supports_filters: bool) -> Vec<FilterKind> {
    if !backend_supports_filters {
        return Vec::new();
    }
    vec![FilterKind::GaussianBlur, FilterKind::Invert]
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterError {
    UnknownParam { filter: &'static str, param: String },
    InvalidValue(f64),
    IndexOutOfRange { index: usize, len: usize },
    Unsupported,
}

impl std::fmt::Display for FilterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterError::UnknownParam { filter, param } => {
                write!(f, "filter {filter} has no parameter {param}")
            }
            FilterError::InvalidValue(v) => write!(f, "invalid filter parameter value: {v}"),
            FilterError::IndexOutOfRange { index, len } => {
                write!(f, "filter index {index} out of range (chain has {len})")
            }
            FilterError::Unsupported => write!(f, "render backend does not support filters"),
        }
    }
}

impl std::error::Error for FilterError {}

/// One configured filter: its kind, parameter schema and current values.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterWrapper {
    kind: FilterKind,
    values: Vec<f64>,
}

impl FilterWrapper {
    pub fn new(kind: FilterKind) -> Self {
        Self {
            kind,
            values: filter_params(kind).iter().map(|p| p.default).collect(),
        }
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn display_name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn params(&self) -> &'static [FilterParam] {
        filter_params(self.kind)
    }

    pub fn param(&self, name: &str) -> Option<f64> {
        let i = self.params().iter().position(|p| p.name == name)?;
        self.values.get(i).copied()
    }

    /// Sets a parameter, clamped to its range. Returns the stored value.
    pub fn set_param(&mut self, name: &str, value: f64) -> Result<f64, FilterError> {
        if value.is_nan() {
            return Err(FilterError::InvalidValue(value));
        }
        let Some(i) = self.params().iter().position(|p| p.name == name) else {
            return Err(FilterError::UnknownParam {
                filter: self.display_name(),
                param: name.to_string(),
            });
        };
        let (lo, hi) = self.params()[i].range;
        let clamped = value.clamp(lo, hi);
        self.values[i] = clamped;
        Ok(clamped)
    }

    pub fn spec(&self) -> FilterSpec {
        FilterSpec {
            kind: self.kind,
            params: self
                .params()
                .iter()
                .zip(&self.values)
                .map(|(p, v)| (p.name, *v))
                .collect(),
        }
    }
}

//! Generation request parsing and validation

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::GenerationConfig;

pub const MIN_STEPS: u32 = 1;
pub const MAX_STEPS: u32 = 100;
pub const MIN_GUIDANCE_SCALE: f64 = 1.0;
pub const MAX_GUIDANCE_SCALE: f64 = 20.0;
pub const MIN_DIMENSION: u32 = 256;
pub const DIMENSION_MULTIPLE: u32 = 8;
pub const MAX_SEED: i64 = u32::MAX as i64;

/// Raw generation parameters as received over the wire.
///
/// Numeric fields are kept wide so out-of-range values reach validation
/// instead of failing deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateParams {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub num_inference_steps: Option<i64>,
    #[serde(default)]
    pub guidance_scale: Option<f64>,
    #[serde(default)]
    pub width: Option<i64>,
    #[serde(default)]
    pub height: Option<i64>,
    #[serde(default)]
    pub seed: Option<i64>,
}

impl GenerateParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Default::default()
        }
    }
}

/// Kind of constraint a field violated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Missing,
    Empty,
    TooLong,
    OutOfRange,
    NotMultipleOfEight,
}

/// A single violated constraint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldViolation {
    pub field: &'static str,
    pub kind: ViolationKind,
    pub message: String,
}

/// Every constraint a request violated
#[derive(Debug, Clone)]
pub struct ValidationErrors {
    violations: Vec<FieldViolation>,
}

impl ValidationErrors {
    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }

    pub fn has(&self, field: &str, kind: ViolationKind) -> bool {
        self.violations
            .iter()
            .any(|v| v.field == field && v.kind == kind)
    }

    /// True when a width or height is not a multiple of 8
    pub fn is_dimension_alignment(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.kind == ViolationKind::NotMultipleOfEight)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Request validation failed: ")?;
        for (i, violation) in self.violations.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", violation.field, violation.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Limits and defaults applied while validating requests
#[derive(Debug, Clone)]
pub struct RequestLimits {
    pub max_prompt_length: usize,
    pub max_dimension: u32,
    pub default_steps: u32,
    pub default_guidance_scale: f64,
    pub default_width: u32,
    pub default_height: u32,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self::from(&GenerationConfig::default())
    }
}

impl From<&GenerationConfig> for RequestLimits {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            max_prompt_length: config.max_prompt_length,
            max_dimension: config.max_image_size,
            default_steps: config.default_steps,
            default_guidance_scale: config.default_guidance_scale,
            default_width: config.default_width,
            default_height: config.default_height,
        }
    }
}

/// A validated generation request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    prompt: String,
    negative_prompt: Option<String>,
    num_inference_steps: u32,
    guidance_scale: f64,
    width: u32,
    height: u32,
    seed: Option<u32>,
}

impl GenerationRequest {
    /// Validate raw parameters, collecting every violation
    pub fn new(
        params: GenerateParams,
        limits: &RequestLimits,
    ) -> Result<Self, ValidationErrors> {
        let mut violations = Vec::new();

        let prompt = match params.prompt {
            None => {
                violations.push(FieldViolation {
                    field: "prompt",
                    kind: ViolationKind::Missing,
                    message: "field required".to_string(),
                });
                String::new()
            }
            Some(prompt) => {
                check_text("prompt", &prompt, limits.max_prompt_length, true, &mut violations);
                prompt
            }
        };

        if let Some(negative) = &params.negative_prompt {
            check_text(
                "negative_prompt",
                negative,
                limits.max_prompt_length,
                false,
                &mut violations,
            );
        }

        let steps = params
            .num_inference_steps
            .unwrap_or(i64::from(limits.default_steps));
        if steps < i64::from(MIN_STEPS) || steps > i64::from(MAX_STEPS) {
            violations.push(FieldViolation {
                field: "num_inference_steps",
                kind: ViolationKind::OutOfRange,
                message: format!(
                    "must be between {} and {}, got {}",
                    MIN_STEPS, MAX_STEPS, steps
                ),
            });
        }

        let guidance_scale = params
            .guidance_scale
            .unwrap_or(limits.default_guidance_scale);
        if !(MIN_GUIDANCE_SCALE..=MAX_GUIDANCE_SCALE).contains(&guidance_scale) {
            violations.push(FieldViolation {
                field: "guidance_scale",
                kind: ViolationKind::OutOfRange,
                message: format!(
                    "must be between {} and {}, got {}",
                    MIN_GUIDANCE_SCALE, MAX_GUIDANCE_SCALE, guidance_scale
                ),
            });
        }

        let width = params.width.unwrap_or(i64::from(limits.default_width));
        check_dimension("width", width, limits.max_dimension, &mut violations);
        let height = params.height.unwrap_or(i64::from(limits.default_height));
        check_dimension("height", height, limits.max_dimension, &mut violations);

        if let Some(seed) = params.seed {
            if !(0..=MAX_SEED).contains(&seed) {
                violations.push(FieldViolation {
                    field: "seed",
                    kind: ViolationKind::OutOfRange,
                    message: format!("must be between 0 and {}, got {}", MAX_SEED, seed),
                });
            }
        }

        if !violations.is_empty() {
            return Err(ValidationErrors { violations });
        }

        // Every numeric value was range-checked above
        Ok(Self {
            prompt,
            negative_prompt: params.negative_prompt,
            num_inference_steps: steps as u32,
            guidance_scale,
            width: width as u32,
            height: height as u32,
            seed: params.seed.map(|s| s as u32),
        })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn negative_prompt(&self) -> Option<&str> {
        self.negative_prompt.as_deref()
    }

    pub fn num_inference_steps(&self) -> u32 {
        self.num_inference_steps
    }

    pub fn guidance_scale(&self) -> f64 {
        self.guidance_scale
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn seed(&self) -> Option<u32> {
        self.seed
    }
}

fn check_text(
    field: &'static str,
    value: &str,
    max_len: usize,
    required: bool,
    violations: &mut Vec<FieldViolation>,
) {
    let len = value.chars().count();
    if required && value.is_empty() {
        violations.push(FieldViolation {
            field,
            kind: ViolationKind::Empty,
            message: "must not be empty".to_string(),
        });
    }
    if len > max_len {
        violations.push(FieldViolation {
            field,
            kind: ViolationKind::TooLong,
            message: format!("must be at most {} characters, got {}", max_len, len),
        });
    }
}

fn check_dimension(
    field: &'static str,
    value: i64,
    max: u32,
    violations: &mut Vec<FieldViolation>,
) {
    if value < i64::from(MIN_DIMENSION) || value > i64::from(max) {
        violations.push(FieldViolation {
            field,
            kind: ViolationKind::OutOfRange,
            message: format!("must be between {} and {}, got {}", MIN_DIMENSION, max, value),
        });
    }
    if value % i64::from(DIMENSION_MULTIPLE) != 0 {
        violations.push(FieldViolation {
            field,
            kind: ViolationKind::NotMultipleOfEight,
            message: format!("must be a multiple of {}, got {}", DIMENSION_MULTIPLE, value),
        });
    }
}

//! Job request, handle, status and retry policy types.
//!
//! A job moves through `Unsubmitted -> Submitted -> {Completed | Failed |
//! TimedOut | Cancelled}`. `Unsubmitted` has no value of its own: a handle
//! only exists once the service accepted the request. The terminal states
//! never transition again, see [`JobState::can_transition_to`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default output width in pixels.
pub const DEFAULT_WIDTH: u32 = 64;
/// Default output height in pixels.
pub const DEFAULT_HEIGHT: u32 = 64;
/// Default number of denoising steps.
pub const DEFAULT_STEPS: u32 = 10;
/// Default classifier-free guidance scale.
pub const DEFAULT_GUIDANCE_SCALE: f32 = 7.5;
/// Default RNG seed, so repeated runs are reproducible.
pub const DEFAULT_SEED: u64 = 12345;

/// Default number of status polls before a job is considered timed out.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;
/// Default pause between two status polls.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Job request
// ---------------------------------------------------------------------------

/// Raw, unvalidated generation parameters.
///
/// Field names match the JSON shape the generation service accepts.
/// Convert into a [`JobRequest`] with [`JobRequest::new`] to enforce the
/// invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    pub seed: u64,
}

impl GenerationParams {
    /// Parameters for `prompt` with every other field at its default.
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            num_inference_steps: DEFAULT_STEPS,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
            seed: DEFAULT_SEED,
        }
    }
}

/// A validated, immutable generation request.
///
/// Invariants: non-blank prompt, `width > 0`, `height > 0`,
/// `num_inference_steps >= 1`, finite `guidance_scale > 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GenerationParams", into = "GenerationParams")]
pub struct JobRequest {
    params: GenerationParams,
}

impl JobRequest {
    /// Validate `params` and wrap them.
    pub fn new(params: GenerationParams) -> Result<Self, CoreError> {
        validate_prompt(&params.prompt)?;
        validate_dimension("width", params.width)?;
        validate_dimension("height", params.height)?;
        validate_steps(params.num_inference_steps)?;
        validate_guidance_scale(params.guidance_scale)?;
        Ok(Self { params })
    }

    pub fn prompt(&self) -> &str {
        &self.params.prompt
    }

    pub fn negative_prompt(&self) -> Option<&str> {
        self.params.negative_prompt.as_deref()
    }

    pub fn width(&self) -> u32 {
        self.params.width
    }

    pub fn height(&self) -> u32 {
        self.params.height
    }

    pub fn steps(&self) -> u32 {
        self.params.num_inference_steps
    }

    pub fn guidance_scale(&self) -> f32 {
        self.params.guidance_scale
    }

    pub fn seed(&self) -> u64 {
        self.params.seed
    }

    /// Borrow the underlying parameters.
    pub fn params(&self) -> &GenerationParams {
        &self.params
    }
}

impl TryFrom<GenerationParams> for JobRequest {
    type Error = CoreError;

    fn try_from(params: GenerationParams) -> Result<Self, Self::Error> {
        Self::new(params)
    }
}

impl From<JobRequest> for GenerationParams {
    fn from(request: JobRequest) -> Self {
        request.params
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// Validate that the prompt contains at least one non-whitespace character.
pub fn validate_prompt(prompt: &str) -> Result<(), CoreError> {
    if prompt.trim().is_empty() {
        return Err(CoreError::Validation("prompt must not be empty".to_string()));
    }
    Ok(())
}

/// Validate that an image dimension is non-zero.
pub fn validate_dimension(name: &str, value: u32) -> Result<(), CoreError> {
    if value == 0 {
        return Err(CoreError::Validation(format!(
            "{name} must be greater than 0"
        )));
    }
    Ok(())
}

/// Validate that at least one inference step is requested.
pub fn validate_steps(steps: u32) -> Result<(), CoreError> {
    if steps == 0 {
        return Err(CoreError::Validation(
            "num_inference_steps must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Validate that the guidance scale is a finite, strictly positive number.
pub fn validate_guidance_scale(scale: f32) -> Result<(), CoreError> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(CoreError::Validation(format!(
            "guidance_scale must be a finite number greater than 0, got {scale}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Handle and status
// ---------------------------------------------------------------------------

/// Opaque identifier the service assigns to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a single status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Queued or still running.
    Pending,
    /// Result payload is ready to fetch.
    Completed,
    /// The service gave up on the job.
    Failed(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Client-side lifecycle state of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Completed,
    Failed(String),
    /// The poll budget ran out after `attempts` status checks.
    TimedOut { attempts: u32 },
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Submitted)
    }

    /// Only `Submitted` may move, and only into a terminal state.
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        matches!(self, Self::Submitted) && next.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded polling budget: at most `max_attempts` status checks, spaced
/// `delay` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Build a policy. `max_attempts` must be at least 1.
    pub fn new(max_attempts: u32, delay: Duration) -> Result<Self, CoreError> {
        if max_attempts == 0 {
            return Err(CoreError::Validation(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            delay,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

use std::fmt;
use thiserror::Error;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Dispatch,
    Fetch,
    Decode,
    Recognize,
    Translate,
    Render,
    Worker,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Dispatch => "dispatch",
            Step::Fetch => "fetch",
            Step::Decode => "decode",
            Step::Recognize => "recognize",
            Step::Translate => "translate",
            Step::Render => "render",
            Step::Worker => "worker",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid image url '{0}'")]
    InvalidUrl(String),

    #[error("all fetch tiers failed for {url}: {}", .failures.join("; "))]
    Exhausted { url: String, failures: Vec<String> },
}

#[derive(Debug, Error)]
pub enum RecognizerError {
    #[error("recognizer initialization failed for '{lang}': {detail}")]
    Init { lang: String, detail: String },

    #[error("recognition failed: {0}")]
    Recognize(String),

    #[error("image could not be decoded: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
#[error("translation failed for block {index}: {detail}")]
pub struct TranslationError {
    pub index: usize,
    pub detail: String,
}

#[derive(Debug, Error)]
#[error("{label} delivery failed after {attempts} attempt(s): {last}")]
pub struct TransportError {
    pub label: String,
    pub attempts: usize,
    pub last: String,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("native image size is empty ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("raster composition failed: {0}")]
    Raster(String),

    #[error("overlay could not be attached: {0}")]
    Attach(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Recognizer(#[from] RecognizerError),

    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Terminal failure of one task, tagged with the stage it happened in.
#[derive(Debug, Error)]
#[error("[{step}] {source}")]
pub struct StepError {
    pub step: Step,
    #[source]
    pub source: PipelineError,
}

impl StepError {
    pub fn new(step: Step, source: impl Into<PipelineError>) -> Self {
        Self {
            step,
            source: source.into(),
        }
    }
}

pub(crate) trait StepContext<T> {
    fn at_step(self, step: Step) -> Result<T, StepError>;
}

impl<T, E: Into<PipelineError>> StepContext<T> for Result<T, E> {
    fn at_step(self, step: Step) -> Result<T, StepError> {
        self.map_err(|err| StepError::new(step, err))
    }
}

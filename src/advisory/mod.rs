//! Optional pre-flight code review.
//!
//! The reviewer is an external collaborator. Its verdict is advice only:
//! any failure degrades to "valid" so that an unavailable reviewer never
//! blocks a compile.

use thiserror::Error;

/// Note attached to a verdict produced without a reviewer.
pub const UNAVAILABLE_GUIDANCE: &str = "Code review is unavailable; proceeding without it.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewInput {
    pub code: String,
    pub reference: Option<String>,
    pub instruction: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewVerdict {
    pub valid: bool,
    pub guidance: String,
    /// False when this verdict is the fallback.
    pub from_advisor: bool,
}

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("no code advisor configured")]
    Unavailable,

    #[error("code advisor failed: {0}")]
    Failed(String),
}

/// A code reviewer.
pub trait CodeAdvisor: Send + Sync {
    fn review(&self, input: &ReviewInput) -> Result<ReviewVerdict, AdvisorError>;
}

/// The advisor used when none is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAdvisor;

impl CodeAdvisor for NoAdvisor {
    fn review(&self, _input: &ReviewInput) -> Result<ReviewVerdict, AdvisorError> {
        Err(AdvisorError::Unavailable)
    }
}

/// Ask `advisor`, treating any failure as a pass.
pub fn advise(advisor: &dyn CodeAdvisor, input: &ReviewInput) -> ReviewVerdict {
    match advisor.review(input) {
        Ok(verdict) => verdict,
        Err(AdvisorError::Unavailable) => {
            log::debug!("no code advisor, treating code as valid");
            fallback()
        }
        Err(e) => {
            log::warn!("{}, treating code as valid", e);
            fallback()
        }
    }
}

fn fallback() -> ReviewVerdict {
    ReviewVerdict {
        valid: true,
        guidance: UNAVAILABLE_GUIDANCE.to_string(),
        from_advisor: false,
    }
}

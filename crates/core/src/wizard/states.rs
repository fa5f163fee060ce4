use serde::{Deserialize, Serialize};

use crate::wizard::submission::FailureCategory;

/// Coarse status exposed to hosts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStatus {
    Editing,
    Submitting,
    Succeeded,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WizardState {
    Editing { step: usize },
    Submitting { step: usize },
    Succeeded,
    Failed { step: usize, category: FailureCategory },
}

impl WizardState {
    pub fn status(&self) -> WizardStatus {
        match self {
            Self::Editing { .. } => WizardStatus::Editing,
            Self::Submitting { .. } => WizardStatus::Submitting,
            Self::Succeeded => WizardStatus::Succeeded,
            Self::Failed { .. } => WizardStatus::Failed,
        }
    }

    pub fn step(&self) -> Option<usize> {
        match self {
            Self::Editing { step } | Self::Submitting { step } | Self::Failed { step, .. } => {
                Some(*step)
            }
            Self::Succeeded => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WizardEvent {
    StepCompleted,
    StepBack,
    SubmitStarted,
    SubmitSucceeded,
    SubmitFailed(FailureCategory),
    FailureAcknowledged,
    RetryRequested,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WizardAction {
    ShowStep(usize),
    InvokeSubmission,
    ShowConfirmation,
    ShowFailure(FailureCategory),
    DestroySession,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: WizardState,
    pub to: WizardState,
    pub event: WizardEvent,
    pub actions: Vec<WizardAction>,
}

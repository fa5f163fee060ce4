use thiserror::Error;

use crate::wizard::states::{TransitionOutcome, WizardAction, WizardEvent, WizardState};
use crate::wizard::submission::FailureCategory;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WizardTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: WizardState, event: WizardEvent },
    #[error("step {step} is not the final step ({last})")]
    NotOnFinalStep { step: usize, last: usize },
    #[error("step {step} is the final step; submit instead of advancing")]
    FinalStepRequiresSubmission { step: usize },
    #[error("already on the first step")]
    AtFirstStep,
    #[error("{category} failures cannot be retried from the wizard")]
    RetryNotAllowed { category: FailureCategory },
}

/// Pure transition table for a linear wizard with `total_steps` steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepMachine {
    last_step: usize,
}

impl StepMachine {
    /// A wizard always has at least one step; zero is treated as one.
    pub fn new(total_steps: usize) -> Self {
        Self { last_step: total_steps.max(1) - 1 }
    }

    pub fn total_steps(&self) -> usize {
        self.last_step + 1
    }

    pub fn last_step(&self) -> usize {
        self.last_step
    }

    pub fn initial_state(&self) -> WizardState {
        WizardState::Editing { step: 0 }
    }

    pub fn apply(
        &self,
        current: &WizardState,
        event: &WizardEvent,
    ) -> Result<TransitionOutcome, WizardTransitionError> {
        use WizardAction::{DestroySession, InvokeSubmission, ShowConfirmation, ShowFailure, ShowStep};
        use WizardState::{Editing, Failed, Submitting, Succeeded};

        let (to, actions) = match (*current, *event) {
            (Editing { step }, WizardEvent::StepCompleted) => {
                if step >= self.last_step {
                    return Err(WizardTransitionError::FinalStepRequiresSubmission { step });
                }
                (Editing { step: step + 1 }, vec![ShowStep(step + 1)])
            }
            (Editing { step }, WizardEvent::StepBack) => {
                if step == 0 {
                    return Err(WizardTransitionError::AtFirstStep);
                }
                (Editing { step: step - 1 }, vec![ShowStep(step - 1)])
            }
            (Editing { step }, WizardEvent::SubmitStarted) => {
                if step != self.last_step {
                    return Err(WizardTransitionError::NotOnFinalStep {
                        step,
                        last: self.last_step,
                    });
                }
                (Submitting { step }, vec![InvokeSubmission])
            }
            (Submitting { .. }, WizardEvent::SubmitSucceeded) => (Succeeded, vec![ShowConfirmation]),
            (Submitting { step }, WizardEvent::SubmitFailed(category)) => {
                (Failed { step, category }, vec![ShowFailure(category)])
            }
            (Failed { step, category }, WizardEvent::RetryRequested) => {
                if !category.is_retryable() {
                    return Err(WizardTransitionError::RetryNotAllowed { category });
                }
                (Submitting { step }, vec![InvokeSubmission])
            }
            (Failed { step, category }, WizardEvent::FailureAcknowledged) => {
                if category.is_retryable() {
                    (Editing { step }, vec![ShowStep(step)])
                } else {
                    (*current, vec![DestroySession])
                }
            }
            _ => {
                return Err(WizardTransitionError::InvalidTransition {
                    state: *current,
                    event: *event,
                });
            }
        };

        Ok(TransitionOutcome { from: *current, to, event: *event, actions })
    }
}

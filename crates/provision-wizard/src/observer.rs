use std::sync::mpsc::Sender;

use provision_spec::Entry;
use serde::Serialize;
use tracing::{debug, info};

use crate::feedback::Feedback;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    Finished,
    EmptyWorkflow,
    Abandoned,
}

/// Events pushed to observers, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    NextQuestionReady {
        question: Entry,
    },
    /// `is_new` is false when the feedback is re-emitted after a restore.
    FeedbackEntered {
        feedback: Feedback,
        is_new: bool,
    },
    Completed {
        reason: CompletionReason,
    },
    SessionRestored {
        session_id: String,
        feedback_count: usize,
    },
}

/// Receives notifications synchronously, in registration order.
pub trait WizardObserver {
    fn notify(&mut self, notification: &Notification);
}

impl WizardObserver for Sender<Notification> {
    fn notify(&mut self, notification: &Notification) {
        // A dropped receiver only means nobody is listening anymore.
        let _ = self.send(notification.clone());
    }
}

/// Forwards notifications to `tracing`. Sensitive values are masked.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl WizardObserver for TracingObserver {
    fn notify(&mut self, notification: &Notification) {
        match notification {
            Notification::NextQuestionReady { question } => {
                debug!(entry = %question.id, kind = %question.kind, "next question ready");
            }
            Notification::FeedbackEntered { feedback, is_new } => {
                debug!(
                    feedback_id = feedback.feedback_id,
                    entry = %feedback.entry,
                    value = %feedback.display_value(),
                    automatic = feedback.is_automatic,
                    is_new,
                    "feedback entered"
                );
            }
            Notification::Completed { reason } => {
                info!(?reason, "traversal completed");
            }
            Notification::SessionRestored {
                session_id,
                feedback_count,
            } => {
                info!(%session_id, feedback_count, "session restored");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn sender_forwards_notifications() {
        let (mut tx, rx) = mpsc::channel();
        tx.notify(&Notification::Completed {
            reason: CompletionReason::Finished,
        });
        assert_eq!(
            rx.try_recv().ok(),
            Some(Notification::Completed {
                reason: CompletionReason::Finished
            })
        );
    }

    #[test]
    fn sender_ignores_dropped_receiver() {
        let (mut tx, rx) = mpsc::channel::<Notification>();
        drop(rx);
        tx.notify(&Notification::Completed {
            reason: CompletionReason::Abandoned,
        });
    }

    #[test]
    fn notifications_are_tagged_by_event() {
        let value = serde_json::to_value(Notification::SessionRestored {
            session_id: "s1".into(),
            feedback_count: 2,
        })
        .expect("serialize");
        assert_eq!(value["event"], "session_restored");
        assert_eq!(value["feedback_count"], 2);
    }
}

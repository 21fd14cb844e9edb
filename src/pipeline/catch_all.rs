//! Outermost guard: a panic below becomes an `Internal` failure value
//!
//! After a caught panic the chain below is in an unknown state, so the
//! stage is poisoned and reports exhaustion from then on. Calling
//! `move_next` after exhaustion is a caller bug; it is logged and answered
//! with `false`.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;

use super::stage::QueryPipelineStage;
use crate::errors::QueryError;
use crate::observability::{PipelineEvent, Trace};
use crate::pagination::QueryPageResult;

pub struct CatchAllStage {
    inner: Box<QueryPipelineStage>,
    exhausted: bool,
    poisoned: bool,
    pub(crate) current: Option<QueryPageResult>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "stage panicked".to_string()
    }
}

impl CatchAllStage {
    pub fn new(inner: QueryPipelineStage) -> QueryPipelineStage {
        QueryPipelineStage::CatchAll(Self {
            inner: Box::new(inner),
            exhausted: false,
            poisoned: false,
            current: None,
        })
    }

    pub(crate) async fn move_next(&mut self, trace: &Trace) -> bool {
        if self.poisoned {
            self.current = None;
            return false;
        }
        if self.exhausted {
            tracing::warn!(
                event = %PipelineEvent::MoveNextAfterExhaustion,
                stage = self.inner.name(),
                "move_next called on an exhausted pipeline"
            );
            self.current = None;
            return false;
        }

        let advanced = AssertUnwindSafe(self.inner.move_next(trace))
            .catch_unwind()
            .await;
        match advanced {
            Ok(true) => {
                self.current = self.inner.take_current();
                if let Some(Err(error)) = &self.current {
                    tracing::debug!(
                        event = %PipelineEvent::StageFailure,
                        code = error.code(),
                        "pipeline returned a failure: {}",
                        error
                    );
                }
                true
            }
            Ok(false) => {
                tracing::debug!(event = %PipelineEvent::StageExhausted, "pipeline exhausted");
                self.exhausted = true;
                self.current = None;
                false
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(event = %PipelineEvent::StagePanic, "stage panicked: {}", message);
                self.poisoned = true;
                self.inner.dispose();
                self.current = Some(Err(QueryError::Internal(message)));
                true
            }
        }
    }

    pub(crate) fn dispose(&mut self) {
        self.inner.dispose();
        self.current = None;
    }
}

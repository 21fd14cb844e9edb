//! Suppresses zero-row pages
//!
//! Pulls the inner stage in a loop, never by recursion, so an arbitrarily
//! long run of empty pages costs constant stack. The charge of every
//! swallowed page is carried into the next page handed out.

use tokio_util::sync::CancellationToken;

use super::stage::{take_inner_result, QueryPipelineStage};
use crate::errors::QueryError;
use crate::observability::Trace;
use crate::pagination::{new_activity_id, QueryPage, QueryPageResult};

pub struct SkipEmptyPageStage {
    inner: Box<QueryPipelineStage>,
    cancellation: CancellationToken,
    pending_charge: f64,
    returned_final_page: bool,
    pub(crate) current: Option<QueryPageResult>,
}

impl SkipEmptyPageStage {
    pub fn new(inner: QueryPipelineStage, cancellation: CancellationToken) -> QueryPipelineStage {
        QueryPipelineStage::SkipEmptyPage(Self {
            inner: Box::new(inner),
            cancellation,
            pending_charge: 0.0,
            returned_final_page: false,
            current: None,
        })
    }

    pub(crate) async fn move_next(&mut self, trace: &Trace) -> bool {
        loop {
            if self.cancellation.is_cancelled() {
                self.current = Some(Err(QueryError::Cancelled));
                return true;
            }
            if !self.inner.move_next(trace).await {
                if self.returned_final_page {
                    self.current = None;
                    return false;
                }
                // The caller still gets one page for the charge spent.
                self.returned_final_page = true;
                let charge = std::mem::take(&mut self.pending_charge);
                self.current = Some(Ok(QueryPage::empty(charge, new_activity_id(), None)));
                return true;
            }

            let mut page = match take_inner_result(&mut self.inner) {
                Ok(page) => page,
                Err(error) => {
                    self.current = Some(Err(error));
                    return true;
                }
            };
            if page.documents.is_empty() && page.state.is_some() {
                self.pending_charge += page.request_charge;
                continue;
            }

            page.request_charge += std::mem::take(&mut self.pending_charge);
            if page.state.is_none() {
                self.returned_final_page = true;
            }
            self.current = Some(Ok(page));
            return true;
        }
    }

    pub(crate) fn dispose(&mut self) {
        self.inner.dispose();
        self.current = None;
    }
}

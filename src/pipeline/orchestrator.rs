//! Batch orchestrator. Pages through unread alerts, extracts and classifies
//! their articles, and flushes results as it goes.
//!
//! A run is strictly sequential. Per-article and per-message failures are
//! logged and skipped; only mailbox infrastructure failures (and sink
//! failures) end the run, and never before the records gathered so far have
//! been written to a final artifact.

use std::sync::Arc;

use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::types::{ClassifiedRecord, FlushKind, RunState, RunSummary};
use crate::classify::Classifier;
use crate::config::RunConfig;
use crate::error::{Error, MailboxError, PipelineError};
use crate::extract::ArticleExtractor;
use crate::mailbox::{AlertEmail, ListRequest, MailboxSession, MessagePage};
use crate::retry::retry_async;
use crate::sink::DurableSink;

/// How a failed message affects the run.
#[derive(Debug)]
enum MessageFailure {
    /// Log and continue with the next message.
    Skip(PipelineError),
    /// The mailbox itself is unusable; stop the run.
    Abort(PipelineError),
}

impl MessageFailure {
    fn fetch(id: &str, source: MailboxError) -> Self {
        let escalate = source.is_transient()
            || matches!(
                source,
                MailboxError::AuthExpired | MailboxError::RefreshFailed(_)
            );
        let error = PipelineError::Fetch {
            id: id.to_string(),
            source,
        };
        if escalate {
            Self::Abort(error)
        } else {
            Self::Skip(error)
        }
    }
}

/// Drives one triage run from listing to final flush.
pub struct Orchestrator {
    mailbox: Arc<dyn MailboxSession>,
    extractor: ArticleExtractor,
    classifier: Arc<dyn Classifier>,
    sink: Arc<dyn DurableSink>,
    config: RunConfig,
}

impl Orchestrator {
    pub fn new(
        mailbox: Arc<dyn MailboxSession>,
        extractor: ArticleExtractor,
        classifier: Arc<dyn Classifier>,
        sink: Arc<dyn DurableSink>,
        config: RunConfig,
    ) -> Self {
        Self {
            mailbox,
            extractor,
            classifier,
            sink,
            config,
        }
    }

    /// Process up to `max_results` unread alerts.
    ///
    /// On success, every record of the run is in a final artifact (when there
    /// is at least one). On failure, the records gathered before the failure
    /// are flushed to a final artifact first and the original error returned.
    pub async fn run(&self) -> Result<RunSummary, Error> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<RunSummary, Error> {
        info!(
            max_results = self.config.max_results,
            batch_size = self.config.batch_size,
            query = %self.config.query,
            "Starting run"
        );

        let mut state = RunState::new();
        let mut batch = Vec::new();

        if let Err(e) = self.process_pages(&mut state, &mut batch).await {
            error!(
                error = %e,
                processed = state.processed_count,
                pages = state.pages,
                "Run aborted"
            );
            state.all_records.append(&mut batch);
            self.flush_before_abort(&mut state).await;
            return Err(e);
        }

        if !state.all_records.is_empty() {
            let path = self
                .sink
                .persist(&state.all_records, FlushKind::Final)
                .await?;
            state.artifacts.push(path);
        }

        let summary = RunSummary::from_state(run_id, &state);
        info!(
            processed = summary.processed_count,
            pages = summary.pages,
            records = summary.records,
            failed_messages = summary.failed_messages,
            artifacts = summary.artifacts.len(),
            "Run complete"
        );
        Ok(summary)
    }

    async fn process_pages(
        &self,
        state: &mut RunState,
        batch: &mut Vec<ClassifiedRecord>,
    ) -> Result<(), Error> {
        let cap = self.config.max_results;

        while state.processed_count < cap {
            let remaining = state.remaining(cap);
            let page = self
                .list_page(state.page_token.as_deref(), self.config.batch_size.min(remaining))
                .await?;
            state.pages += 1;

            let mut ids = page.message_ids;
            ids.truncate(remaining);
            if ids.is_empty() {
                info!(page = state.pages, "No unread alerts left");
                break;
            }
            info!(page = state.pages, messages = ids.len(), "Processing page");

            for id in &ids {
                match self.process_message(id, batch).await {
                    Ok(records) => debug!(id = %id, records, "Message processed"),
                    Err(MessageFailure::Skip(e)) => {
                        warn!(id = %e.message_id(), error = %e, "Skipping message");
                        state.failed_messages += 1;
                    }
                    Err(MessageFailure::Abort(e)) => return Err(e.into()),
                }
            }

            state.processed_count += ids.len();
            self.flush_page(state, batch).await?;

            state.page_token = page.next_cursor;
            if state.page_token.is_none() {
                debug!("Mailbox has no further pages");
                break;
            }
        }

        Ok(())
    }

    async fn list_page(
        &self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<MessagePage, MailboxError> {
        let request = ListRequest {
            query: &self.config.query,
            label: &self.config.label,
            page_size,
            cursor,
        };
        retry_async(
            &self.config.retry,
            "list_unread",
            MailboxError::is_transient,
            || self.mailbox.list_unread(request),
        )
        .await
    }

    /// Fetch, parse, extract and classify one message, appending its records
    /// to `batch`. Records classified before a failure stay in the batch.
    async fn process_message(
        &self,
        id: &str,
        batch: &mut Vec<ClassifiedRecord>,
    ) -> Result<usize, MessageFailure> {
        let raw = retry_async(
            &self.config.retry,
            "fetch_raw",
            MailboxError::is_transient,
            || self.mailbox.fetch_raw(id),
        )
        .await
        .map_err(|e| MessageFailure::fetch(id, e))?;

        let email = AlertEmail::parse(id, &raw).map_err(MessageFailure::Skip)?;
        let Some(html) = email.html_body.as_deref() else {
            debug!(id = %id, sender = %email.sender, "No HTML body");
            return Ok(0);
        };

        let extraction = self.extractor.extract(html);
        for skipped in &extraction.skipped {
            warn!(
                id = %id,
                position = skipped.position,
                error = %skipped.error,
                "Skipping article"
            );
        }
        debug!(
            id = %id,
            anchors = extraction.anchors(),
            articles = extraction.articles.len(),
            "Extracted articles"
        );

        let mut added = 0;
        for article in extraction.articles {
            let relevance = self
                .classifier
                .classify(&article.title, &article.abstract_text)
                .await
                .map_err(|source| {
                    MessageFailure::Skip(PipelineError::Classify {
                        id: id.to_string(),
                        source,
                    })
                })?;
            debug!(id = %id, title = %article.title, %relevance, "Classified");
            batch.push(ClassifiedRecord::new(
                email.date.clone(),
                email.subject.clone(),
                article,
                relevance,
            ));
            added += 1;
        }

        Ok(added)
    }

    /// Move the page's records into the run aggregate and write them as a
    /// partial artifact.
    async fn flush_page(
        &self,
        state: &mut RunState,
        batch: &mut Vec<ClassifiedRecord>,
    ) -> Result<(), Error> {
        if batch.is_empty() && !self.config.flush_empty_batches {
            debug!(page = state.pages, "Empty batch, skipping partial flush");
            return Ok(());
        }

        let start = state.all_records.len();
        state.all_records.append(batch);
        let path = self
            .sink
            .persist(&state.all_records[start..], FlushKind::Partial)
            .await?;
        state.artifacts.push(path);
        Ok(())
    }

    async fn flush_before_abort(&self, state: &mut RunState) {
        if state.all_records.is_empty() {
            return;
        }
        match self
            .sink
            .persist(&state.all_records, FlushKind::Final)
            .await
        {
            Ok(path) => {
                info!(
                    path = %path.display(),
                    records = state.all_records.len(),
                    "Saved collected records before abort"
                );
                state.artifacts.push(path);
            }
            Err(e) => error!(error = %e, "Final flush failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_fetch_failure_aborts() {
        let failure = MessageFailure::fetch(
            "m1",
            MailboxError::Api {
                status: 503,
                message: "backend error".into(),
            },
        );
        assert!(matches!(failure, MessageFailure::Abort(PipelineError::Fetch { .. })));
        assert!(matches!(
            MessageFailure::fetch("m1", MailboxError::AuthExpired),
            MessageFailure::Abort(_)
        ));
    }

    #[test]
    fn permanent_fetch_failure_skips() {
        let failure = MessageFailure::fetch(
            "m2",
            MailboxError::Api {
                status: 404,
                message: "not found".into(),
            },
        );
        match failure {
            MessageFailure::Skip(e) => assert_eq!(e.message_id(), "m2"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(matches!(
            MessageFailure::fetch("m3", MailboxError::Decode("bad base64".into())),
            MessageFailure::Skip(_)
        ));
    }
}

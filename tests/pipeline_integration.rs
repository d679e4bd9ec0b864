//! Integration tests for the alert triage pipeline.
//!
//! Each test drives a full `Orchestrator::run()` against a scripted mailbox,
//! a scripted classifier and either a recording sink or a real `XlsxSink`
//! writing into a temporary directory.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use scholar_triage::classify::{Classifier, LlmClassifier};
use scholar_triage::config::RunConfig;
use scholar_triage::error::{Error, LlmError, MailboxError, PipelineError, SinkError};
use scholar_triage::extract::ArticleExtractor;
use scholar_triage::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
};
use scholar_triage::mailbox::{ListRequest, MailboxSession, MessagePage};
use scholar_triage::pipeline::{ClassifiedRecord, FlushKind, Orchestrator, Relevance, RunSummary};
use scholar_triage::retry::RetryPolicy;
use scholar_triage::sink::{DurableSink, XlsxSink};

// ── Fixtures ────────────────────────────────────────────────────────

fn article(slug: &str, title: &str) -> String {
    format!(
        r#"<h3 style="font-weight:normal;margin:0"><a href="https://scholar.google.com/scholar_url?url=https%3A%2F%2Fjournal.example.com%2F{slug}&amp;hl=en&amp;sa=X" class="gse_alrt_title">{title}</a></h3>
<div style="color:#006621">A Smith, B Jones&#8230;</div>
<div class="gse_alrt_sni">Abstract for {title}</div>"#
    )
}

/// A raw alert email whose HTML body holds `articles`.
fn alert_email(subject: &str, articles: &[String]) -> String {
    format!(
        "From: Google Scholar Alerts <scholaralerts-noreply@google.com>\r\n\
         Subject: {subject}\r\n\
         Date: Tue, 14 May 2024 09:12:00 +0000\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: text/html; charset=UTF-8\r\n\
         \r\n\
         <html><body><div>{}</div></body></html>\r\n",
        articles.join("<br>\n")
    )
}

fn config(batch_size: usize, max_results: usize) -> RunConfig {
    RunConfig {
        max_results,
        batch_size,
        retry: RetryPolicy::immediate(2),
        ..RunConfig::default()
    }
}

// ── Scripted mailbox ────────────────────────────────────────────────

enum Fetch {
    Raw(String),
    Fail(u16),
}

/// Serves fixed pages; cursors are `page-{index}`.
#[derive(Default)]
struct ScriptedMailbox {
    pages: Vec<Vec<&'static str>>,
    messages: HashMap<&'static str, Fetch>,
    /// Page index whose listing fails with a 503.
    list_failure_at: Option<usize>,
    /// Return whole pages regardless of the requested size.
    ignore_page_size: bool,
    requested_sizes: Mutex<Vec<usize>>,
    fetched: Mutex<Vec<String>>,
}

impl ScriptedMailbox {
    fn with_pages(pages: Vec<Vec<&'static str>>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    fn message(mut self, id: &'static str, fetch: Fetch) -> Self {
        self.messages.insert(id, fetch);
        self
    }

    fn fetch_count(&self, id: &str) -> usize {
        self.fetched.lock().unwrap().iter().filter(|f| *f == id).count()
    }
}

#[async_trait]
impl MailboxSession for ScriptedMailbox {
    async fn list_unread(&self, request: ListRequest<'_>) -> Result<MessagePage, MailboxError> {
        self.requested_sizes.lock().unwrap().push(request.page_size);
        let index = request
            .cursor
            .map(|c| c.trim_start_matches("page-").parse::<usize>().unwrap())
            .unwrap_or(0);
        if self.list_failure_at == Some(index) {
            return Err(MailboxError::Api {
                status: 503,
                message: "backend error".into(),
            });
        }

        let page = self.pages.get(index).cloned().unwrap_or_default();
        let take = if self.ignore_page_size { page.len() } else { request.page_size };
        Ok(MessagePage {
            message_ids: page.into_iter().take(take).map(String::from).collect(),
            next_cursor: (index + 1 < self.pages.len()).then(|| format!("page-{}", index + 1)),
        })
    }

    async fn fetch_raw(&self, message_id: &str) -> Result<Vec<u8>, MailboxError> {
        self.fetched.lock().unwrap().push(message_id.to_string());
        match self.messages.get(message_id) {
            Some(Fetch::Raw(raw)) => Ok(raw.as_bytes().to_vec()),
            Some(Fetch::Fail(status)) => Err(MailboxError::Api {
                status: *status,
                message: "fetch failed".into(),
            }),
            None => Err(MailboxError::Api {
                status: 404,
                message: "not found".into(),
            }),
        }
    }
}

// ── Scripted classifier ─────────────────────────────────────────────

/// `Yes` for titles mentioning "Urban", a failure for titles mentioning
/// "Broken", `No` otherwise.
struct TitleClassifier;

#[async_trait]
impl Classifier for TitleClassifier {
    async fn classify(&self, title: &str, _abstract_text: &str) -> Result<Relevance, LlmError> {
        if title.contains("Broken") {
            return Err(LlmError::RequestFailed {
                provider: "stub".into(),
                reason: "connection reset".into(),
            });
        }
        Ok(if title.contains("Urban") {
            Relevance::Yes
        } else {
            Relevance::No
        })
    }
}

/// Stub LLM provider (no real API calls).
struct StubLlm {
    reply: &'static str,
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Ok(CompletionResponse {
            content: self.reply.to_string(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}

// ── Recording sink ──────────────────────────────────────────────────

/// Records every flush attempt. Attempts of a kind listed in `failing`
/// are recorded and then fail with an IO error naming the kind.
#[derive(Default)]
struct RecordingSink {
    flushes: Mutex<Vec<(FlushKind, Vec<ClassifiedRecord>)>>,
    failing: Vec<FlushKind>,
}

impl RecordingSink {
    fn failing(kinds: &[FlushKind]) -> Self {
        Self {
            failing: kinds.to_vec(),
            ..Self::default()
        }
    }

    fn flushes(&self) -> Vec<(FlushKind, Vec<ClassifiedRecord>)> {
        self.flushes.lock().unwrap().clone()
    }

    fn titles(records: &[ClassifiedRecord]) -> Vec<&str> {
        records.iter().map(|r| r.article.title.as_str()).collect()
    }
}

#[async_trait]
impl DurableSink for RecordingSink {
    async fn persist(
        &self,
        records: &[ClassifiedRecord],
        kind: FlushKind,
    ) -> Result<PathBuf, SinkError> {
        let mut flushes = self.flushes.lock().unwrap();
        flushes.push((kind, records.to_vec()));
        if self.failing.contains(&kind) {
            return Err(SinkError::Io {
                path: PathBuf::from(kind.label()),
                source: std::io::Error::other("disk full"),
            });
        }
        Ok(PathBuf::from(format!("{}-{}", kind.label(), flushes.len())))
    }
}

async fn run_with(
    mailbox: &Arc<ScriptedMailbox>,
    classifier: Arc<dyn Classifier>,
    sink: Arc<dyn DurableSink>,
    config: RunConfig,
) -> Result<RunSummary, Error> {
    let orchestrator = Orchestrator::new(
        mailbox.clone(),
        ArticleExtractor::new().unwrap(),
        classifier,
        sink,
        config,
    );
    orchestrator.run().await
}

fn two_page_mailbox() -> ScriptedMailbox {
    ScriptedMailbox::with_pages(vec![vec!["m1"], vec!["m2"]])
        .message(
            "m1",
            Fetch::Raw(alert_email(
                "2 new results",
                &[
                    article("pm25", "Urban PM2.5 from space"),
                    article("sediment", "River sediment transport"),
                ],
            )),
        )
        .message("m2", Fetch::Raw(alert_email("No new results", &[])))
}

fn artifacts_named(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix))
        })
        .collect();
    paths.sort();
    paths
}

fn sheet_of(path: &Path) -> String {
    let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut sheet = archive.by_name("xl/worksheets/sheet1.xml").unwrap();
    let mut xml = String::new();
    sheet.read_to_string(&mut xml).unwrap();
    xml
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn two_pages_write_partial_and_final_workbooks() {
    let dir = tempfile::tempdir().unwrap();
    let mailbox = Arc::new(two_page_mailbox());

    let summary = run_with(
        &mailbox,
        Arc::new(TitleClassifier),
        Arc::new(XlsxSink::new(dir.path())),
        config(1, 400),
    )
    .await
    .unwrap();

    assert_eq!(summary.processed_count, 2);
    assert_eq!(summary.pages, 2);
    assert_eq!(summary.records, 2);
    assert_eq!(summary.failed_messages, 0);
    assert_eq!(summary.artifacts.len(), 2);

    // Page two had no articles, so only page one produced a partial.
    let partials = artifacts_named(dir.path(), "partial_");
    let finals = artifacts_named(dir.path(), "final_");
    assert_eq!(partials.len(), 1);
    assert_eq!(finals.len(), 1);

    let partial = sheet_of(&partials[0]);
    assert_eq!(partial.matches("<row ").count(), 3);
    let final_sheet = sheet_of(&finals[0]);
    assert_eq!(final_sheet.matches("<row ").count(), 3);
    assert!(final_sheet.contains(">journal.example.com/pm25<"));
    assert!(final_sheet.contains(">Urban PM2.5 from space<"));
    assert!(final_sheet.contains(">2 new results<"));
    assert!(final_sheet.contains(">Yes<"));
    assert!(final_sheet.contains(">No<"));
}

#[tokio::test]
async fn empty_batches_flush_when_enabled() {
    let mailbox = Arc::new(two_page_mailbox());
    let sink = Arc::new(RecordingSink::default());
    let config = RunConfig {
        flush_empty_batches: true,
        ..config(1, 400)
    };

    let summary = run_with(&mailbox, Arc::new(TitleClassifier), sink.clone(), config)
        .await
        .unwrap();
    assert_eq!(summary.artifacts.len(), 3);

    let flushes = sink.flushes();
    let kinds: Vec<FlushKind> = flushes.iter().map(|(k, _)| *k).collect();
    assert_eq!(
        kinds,
        vec![FlushKind::Partial, FlushKind::Partial, FlushKind::Final]
    );
    assert_eq!(flushes[0].1.len(), 2);
    assert!(flushes[1].1.is_empty());
    assert_eq!(flushes[2].1.len(), 2);
}

#[tokio::test]
async fn records_carry_email_metadata() {
    let mailbox = Arc::new(two_page_mailbox());
    let sink = Arc::new(RecordingSink::default());
    run_with(&mailbox, Arc::new(TitleClassifier), sink.clone(), config(1, 400))
        .await
        .unwrap();

    let flushes = sink.flushes();
    let (kind, records) = flushes.last().unwrap();
    assert!(kind.is_final());
    let first = &records[0];
    assert_eq!(first.email_subject, "2 new results");
    assert!(first.email_date.contains("14 May 2024"));
    assert_eq!(first.article.url, "journal.example.com/pm25");
    assert_eq!(first.article.authors, "A Smith, B Jones");
    assert_eq!(first.article.abstract_text, "Abstract for Urban PM2.5 from space");
    assert_eq!(first.relevance, Relevance::Yes);
    assert_eq!(records[1].relevance, Relevance::No);
}

#[tokio::test]
async fn classifier_failure_keeps_earlier_records_of_the_message() {
    let mailbox = Arc::new(
        ScriptedMailbox::with_pages(vec![vec!["m1", "m2"]])
            .message(
                "m1",
                Fetch::Raw(alert_email(
                    "2 new results",
                    &[
                        article("a", "Urban canyons and NO2"),
                        article("b", "Broken pipeline study"),
                    ],
                )),
            )
            .message(
                "m2",
                Fetch::Raw(alert_email("1 new result", &[article("c", "Soil moisture")])),
            ),
    );
    let sink = Arc::new(RecordingSink::default());

    let summary = run_with(&mailbox, Arc::new(TitleClassifier), sink.clone(), config(10, 400))
        .await
        .unwrap();

    assert_eq!(summary.processed_count, 2);
    assert_eq!(summary.failed_messages, 1);
    assert_eq!(summary.records, 2);

    let flushes = sink.flushes();
    assert_eq!(flushes.len(), 2);
    assert_eq!(
        RecordingSink::titles(&flushes[0].1),
        vec!["Urban canyons and NO2", "Soil moisture"]
    );
}

#[tokio::test]
async fn fetch_failure_skips_only_that_message() {
    let mailbox = Arc::new(
        ScriptedMailbox::with_pages(vec![vec!["gone", "m2"]])
            .message("gone", Fetch::Fail(404))
            .message(
                "m2",
                Fetch::Raw(alert_email("1 new result", &[article("u", "Urban heat")])),
            ),
    );
    let sink = Arc::new(RecordingSink::default());

    let summary = run_with(&mailbox, Arc::new(TitleClassifier), sink.clone(), config(10, 400))
        .await
        .unwrap();

    assert_eq!(summary.processed_count, 2);
    assert_eq!(summary.failed_messages, 1);
    assert_eq!(summary.records, 1);
    // Permanent failures are not retried.
    assert_eq!(mailbox.fetch_count("gone"), 1);
}

#[tokio::test]
async fn transient_fetch_failure_flushes_collected_records_then_aborts() {
    let mailbox = Arc::new(
        ScriptedMailbox::with_pages(vec![vec!["m1"], vec!["m2", "m3"], vec!["m4"]])
            .message(
                "m1",
                Fetch::Raw(alert_email("page one", &[article("a", "Urban sprawl")])),
            )
            .message(
                "m2",
                Fetch::Raw(alert_email("page two", &[article("b", "Ozone trends")])),
            )
            .message("m3", Fetch::Fail(503))
            .message(
                "m4",
                Fetch::Raw(alert_email("page three", &[article("c", "Never read")])),
            ),
    );
    let sink = Arc::new(RecordingSink::default());

    let err = run_with(&mailbox, Arc::new(TitleClassifier), sink.clone(), config(2, 400))
        .await
        .unwrap_err();

    match err {
        Error::Pipeline(PipelineError::Fetch { id, source }) => {
            assert_eq!(id, "m3");
            assert!(source.is_transient());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(mailbox.fetch_count("m3"), 2);
    assert_eq!(mailbox.fetch_count("m4"), 0);

    let flushes = sink.flushes();
    assert_eq!(flushes.len(), 2);
    assert_eq!(flushes[0].0, FlushKind::Partial);
    assert_eq!(RecordingSink::titles(&flushes[0].1), vec!["Urban sprawl"]);
    assert_eq!(flushes[1].0, FlushKind::Final);
    assert_eq!(
        RecordingSink::titles(&flushes[1].1),
        vec!["Urban sprawl", "Ozone trends"]
    );
}

#[tokio::test]
async fn listing_failure_flushes_previous_pages_then_aborts() {
    let mut mailbox = ScriptedMailbox::with_pages(vec![vec!["m1"], vec!["m2"]]).message(
        "m1",
        Fetch::Raw(alert_email("page one", &[article("a", "Urban runoff")])),
    );
    mailbox.list_failure_at = Some(1);
    let mailbox = Arc::new(mailbox);
    let sink = Arc::new(RecordingSink::default());

    let err = run_with(&mailbox, Arc::new(TitleClassifier), sink.clone(), config(1, 400))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Mailbox(MailboxError::Api { status: 503, .. })
    ));
    // Two attempts at the failing page, one at the first.
    assert_eq!(mailbox.requested_sizes.lock().unwrap().len(), 3);

    let flushes = sink.flushes();
    let (kind, records) = flushes.last().unwrap();
    assert_eq!(*kind, FlushKind::Final);
    assert_eq!(RecordingSink::titles(records), vec!["Urban runoff"]);
}

#[tokio::test]
async fn abort_without_records_writes_nothing() {
    let mut mailbox = ScriptedMailbox::with_pages(vec![vec!["m1"]]);
    mailbox.list_failure_at = Some(0);
    let mailbox = Arc::new(mailbox);
    let sink = Arc::new(RecordingSink::default());

    assert!(
        run_with(&mailbox, Arc::new(TitleClassifier), sink.clone(), config(5, 400))
            .await
            .is_err()
    );
    assert!(sink.flushes().is_empty());
}

#[tokio::test]
async fn result_cap_bounds_requests_and_processing() {
    let pages = vec![
        vec!["a1", "a2", "a3"],
        vec!["b1", "b2", "b3"],
        vec!["c1", "c2", "c3"],
        vec!["d1", "d2", "d3"],
    ];
    let mut mailbox = ScriptedMailbox::with_pages(pages);
    for id in ["a1", "a2", "a3", "b1", "b2", "b3", "c1", "c2", "c3", "d1", "d2", "d3"] {
        mailbox
            .messages
            .insert(id, Fetch::Raw(alert_email(id, &[article(id, "Urban trees")])));
    }
    let mailbox = Arc::new(mailbox);
    let sink = Arc::new(RecordingSink::default());

    let summary = run_with(&mailbox, Arc::new(TitleClassifier), sink.clone(), config(3, 5))
        .await
        .unwrap();

    assert_eq!(summary.processed_count, 5);
    assert_eq!(summary.records, 5);
    assert_eq!(*mailbox.requested_sizes.lock().unwrap(), vec![3, 2]);
    assert_eq!(mailbox.fetched.lock().unwrap().len(), 5);
}

#[tokio::test]
async fn oversized_pages_are_truncated_to_the_cap() {
    let mut mailbox = ScriptedMailbox::with_pages(vec![vec!["a", "b", "c", "d"]]);
    mailbox.ignore_page_size = true;
    for id in ["a", "b", "c", "d"] {
        mailbox
            .messages
            .insert(id, Fetch::Raw(alert_email(id, &[])));
    }
    let mailbox = Arc::new(mailbox);

    let summary = run_with(
        &mailbox,
        Arc::new(TitleClassifier),
        Arc::new(RecordingSink::default()),
        config(50, 2),
    )
    .await
    .unwrap();

    assert_eq!(summary.processed_count, 2);
    assert_eq!(*mailbox.fetched.lock().unwrap(), vec!["a", "b"]);
}

#[tokio::test]
async fn empty_mailbox_writes_no_artifacts() {
    let mailbox = Arc::new(ScriptedMailbox::with_pages(vec![]));
    let sink = Arc::new(RecordingSink::default());

    let summary = run_with(&mailbox, Arc::new(TitleClassifier), sink.clone(), config(50, 400))
        .await
        .unwrap();

    assert_eq!(summary.processed_count, 0);
    assert_eq!(summary.pages, 1);
    assert!(summary.artifacts.is_empty());
    assert!(sink.flushes().is_empty());
}

#[tokio::test]
async fn llm_classifier_drives_relevance() {
    let mailbox = Arc::new(
        ScriptedMailbox::with_pages(vec![vec!["m1"]]).message(
            "m1",
            Fetch::Raw(alert_email(
                "1 new result",
                &[article("x", "Traffic emissions in Leeds")],
            )),
        ),
    );
    let sink = Arc::new(RecordingSink::default());
    let classifier = LlmClassifier::new(Arc::new(StubLlm { reply: " No\n" }));

    run_with(&mailbox, Arc::new(classifier), sink.clone(), config(10, 400))
        .await
        .unwrap();

    let flushes = sink.flushes();
    assert_eq!(flushes[0].1[0].relevance, Relevance::No);
}

fn one_article_per_page_mailbox() -> Arc<ScriptedMailbox> {
    Arc::new(
        ScriptedMailbox::with_pages(vec![vec!["m1"], vec!["m2"]])
            .message(
                "m1",
                Fetch::Raw(alert_email("page one", &[article("a", "Urban parks")])),
            )
            .message(
                "m2",
                Fetch::Raw(alert_email("page two", &[article("b", "Never reached")])),
            ),
    )
}

#[tokio::test]
async fn failed_partial_flush_aborts_after_final_flush() {
    let mailbox = one_article_per_page_mailbox();
    let sink = Arc::new(RecordingSink::failing(&[FlushKind::Partial]));

    let err = run_with(&mailbox, Arc::new(TitleClassifier), sink.clone(), config(1, 400))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Sink(SinkError::Io { .. })));
    // The second page is never listed.
    assert_eq!(mailbox.requested_sizes.lock().unwrap().len(), 1);
    assert_eq!(mailbox.fetch_count("m2"), 0);

    let flushes = sink.flushes();
    assert_eq!(flushes.len(), 2);
    assert_eq!(flushes[0].0, FlushKind::Partial);
    assert_eq!(flushes[1].0, FlushKind::Final);
    assert_eq!(RecordingSink::titles(&flushes[1].1), vec!["Urban parks"]);
}

#[tokio::test]
async fn failed_final_flush_keeps_original_error() {
    let mailbox = one_article_per_page_mailbox();
    let sink = Arc::new(RecordingSink::failing(&[FlushKind::Partial, FlushKind::Final]));

    let err = run_with(&mailbox, Arc::new(TitleClassifier), sink.clone(), config(1, 400))
        .await
        .unwrap_err();

    match err {
        Error::Sink(SinkError::Io { path, .. }) => assert_eq!(path, PathBuf::from("partial")),
        other => panic!("unexpected error: {other}"),
    }
    let kinds: Vec<FlushKind> = sink.flushes().iter().map(|(k, _)| *k).collect();
    assert_eq!(kinds, vec![FlushKind::Partial, FlushKind::Final]);
}

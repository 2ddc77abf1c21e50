use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{ChannelSink, ProgressSink, StageRunner};
use crate::config::{ResolvedConfig, RunOptions, Stage};
use crate::error::PipelineResult;
use crate::io::{content_hash, file_timestamp, read_input, write_final_outputs, write_json_pretty};
use crate::llm::{ChatBackend, LlmGateway, PromptSet, RetryPolicy};
use crate::metrics::{audit_score, coherence_score, QualityMetrics};
use crate::models::{
    PipelineRun, PipelineState, ProgressEvent, RevisedSections, SectionName, Sections,
};
use crate::stages::{
    apply_limits, audit, build, edit_pass1, edit_pass2, fuse, global_check, split, BuildConfig,
    EditPass2Output,
};

/// Drives one paper through the seven stages in order.
///
/// Every stage goes through the [`StageRunner`] so it is cached, timed and
/// persisted the same way. The first stage error moves the run to `Failed`;
/// the partial run record is written to disk and the error is returned.
pub struct Orchestrator<B> {
    gateway: LlmGateway<B>,
    config: ResolvedConfig,
    options: RunOptions,
    prompts: PromptSet,
    runner: StageRunner,
}

impl<B: ChatBackend> Orchestrator<B> {
    pub fn new(backend: B, config: ResolvedConfig, options: RunOptions) -> PipelineResult<Self> {
        let prompts = match &options.prompt_dir {
            Some(dir) => PromptSet::load(dir)?,
            None => PromptSet::builtin(),
        };
        let policy = RetryPolicy::from_config(&config);
        let runner = StageRunner::new(config.preset, &options);

        Ok(Self {
            gateway: LlmGateway::new(backend, policy),
            config,
            options,
            prompts,
            runner,
        })
    }

    pub fn gateway(&self) -> &LlmGateway<B> {
        &self.gateway
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run the pipeline over a file on disk
    pub async fn run_file(
        &self,
        path: &Path,
        sink: &mut dyn ProgressSink,
    ) -> PipelineResult<PipelineRun> {
        let input = read_input(path)?;
        self.execute(&input.text, Some(input.path), sink).await
    }

    /// Run the pipeline over in-memory text
    pub async fn run(&self, text: &str, sink: &mut dyn ProgressSink) -> PipelineResult<PipelineRun> {
        self.execute(text, None, sink).await
    }

    async fn execute(
        &self,
        text: &str,
        input_file: Option<PathBuf>,
        sink: &mut dyn ProgressSink,
    ) -> PipelineResult<PipelineRun> {
        let mut run = PipelineRun::new(content_hash(text), self.config.clone());
        run.input_file = input_file;
        if self.options.enable_metrics {
            run.quality_metrics = Some(QualityMetrics::default());
        }

        info!(
            run_id = %run.run_id,
            "Starting pipeline (preset={}, model={}, {} characters)",
            self.config.preset,
            self.config.params.model,
            text.chars().count()
        );

        let started = Instant::now();
        let before = self.gateway.snapshot();
        let outcome = self.run_stages(text, &mut run, sink).await;

        let calls = self.gateway.snapshot().since(&before);
        let perf = &mut run.performance_metrics;
        perf.total_duration_ms = started.elapsed().as_millis() as u64;
        perf.api_calls = calls.api_calls;
        perf.attempts = calls.attempts;
        perf.failed_attempts = calls.failed_attempts;
        perf.estimated_tokens = calls.estimated_tokens;
        perf.estimated_cost = calls.estimated_cost;

        let finished_at = Utc::now();
        run.finished_at = Some(finished_at);
        let timestamp = file_timestamp(finished_at);

        // The run only counts as done once its final artifacts are on disk
        let outcome = outcome.and_then(|final_text| {
            write_final_outputs(&final_text, &self.options, &timestamp).map(|_| final_text)
        });

        match outcome {
            Ok(final_text) => {
                run.state = run.state.advance();
                run.final_output = Some(final_text);
                let path = match self.persist(&run, &timestamp) {
                    Ok(path) => path,
                    Err(e) => {
                        run.state = PipelineState::Failed(Some(Stage::EditPass2));
                        error!(run_id = %run.run_id, "Pipeline {}: {}", run.state, e);
                        sink.emit(ProgressEvent::failed(Stage::EditPass2, &e.to_string()));
                        return Err(e);
                    }
                };
                info!(
                    run_id = %run.run_id,
                    "Pipeline finished in {:.2}s: {} API call(s), {} cache hit(s), ~${:.4}; record at {:?}",
                    run.performance_metrics.total_duration_ms as f64 / 1000.0,
                    run.performance_metrics.api_calls,
                    run.performance_metrics.cache_hits,
                    run.performance_metrics.estimated_cost,
                    path
                );
                if let Some(quality) = &run.quality_metrics {
                    info!("Overall quality score (heuristic): {:.3}", quality.overall_score);
                }
                Ok(run)
            }
            Err(e) => {
                // Stage errors were already reported by `stage`; a failed
                // final write happens after EditPass2 reported success
                let after_stages = run.state == PipelineState::Running(Stage::EditPass2)
                    && run.result_for(Stage::EditPass2).is_some();
                run.state = run.state.fail();
                run.failed_stage = run.state.current_stage().or(e.stage());
                run.error = Some(e.to_string());
                error!(run_id = %run.run_id, "Pipeline {}: {}", run.state, e);
                if after_stages {
                    sink.emit(ProgressEvent::failed(Stage::EditPass2, &e.to_string()));
                }
                if let Err(persist_err) = self.persist(&run, &timestamp) {
                    error!("Failed to persist failed run record: {}", persist_err);
                }
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        text: &str,
        run: &mut PipelineRun,
        sink: &mut dyn ProgressSink,
    ) -> PipelineResult<String> {
        let config = &self.config;
        let prompts = &self.prompts;
        let gateway = &self.gateway;

        // 1. Split
        let limits = &self.options.split;
        let sections: Sections = self
            .stage(run, sink, Stage::Split, &(text, limits), move || async move {
                let mut sections = split(text);
                apply_limits(&mut sections, limits);
                Ok(sections)
            })
            .await?;
        info!(
            "Split: {} of {} sections found",
            sections.non_empty_count(),
            SectionName::ALL.len()
        );
        if let Some(q) = run.quality_metrics.as_mut() {
            q.observe_split(&sections);
        }

        // 2. Build
        let params = config.stage_params(Stage::Build);
        let templates: Vec<(&str, &str)> = prompts
            .build
            .iter()
            .map(|p| (p.id.as_str(), p.template.as_str()))
            .collect();
        let build_config = BuildConfig {
            parallel: config.parallel_build,
            max_workers: config.max_workers,
        };
        let build_output: String = self
            .stage(run, sink, Stage::Build, &(text, &params, &templates), || {
                build(gateway, &prompts.build, text, &params, build_config)
            })
            .await?;
        if let Some(q) = run.quality_metrics.as_mut() {
            q.observe_build(&build_output);
        }

        // 3. Fuse
        let tree = self
            .stage(run, sink, Stage::Fuse, build_output.as_str(), || {
                std::future::ready(Ok(fuse(&build_output)))
            })
            .await?;
        if let Some(q) = run.quality_metrics.as_mut() {
            q.observe_fuse(&tree, prompts.build.len());
        }

        // 4. Audit
        let params = config.stage_params(Stage::Audit);
        let criteria: Vec<(&str, &str)> = prompts
            .audit
            .iter()
            .map(|c| (c.name, c.template.as_str()))
            .collect();
        let report: String = self
            .stage(
                run,
                sink,
                Stage::Audit,
                &(&sections, &tree, &params, &criteria),
                || audit(gateway, &prompts.audit, &sections, &tree, &params),
            )
            .await?;
        let score = audit_score(&report);
        if score < config.thresholds.audit_score {
            warn!(
                "Audit score {:.2} is below threshold {:.2}",
                score, config.thresholds.audit_score
            );
        }
        if let Some(q) = run.quality_metrics.as_mut() {
            q.observe_audit(&report);
        }

        // 5. EditPass1
        let params = config.stage_params(Stage::EditPass1);
        let revised: RevisedSections = self
            .stage(
                run,
                sink,
                Stage::EditPass1,
                &(&sections, report.as_str(), &params, prompts.edit_pass1.as_str()),
                || edit_pass1(gateway, &prompts.edit_pass1, &sections, &report, &params),
            )
            .await?;

        // 6. GlobalCheck
        let params = config.stage_params(Stage::GlobalCheck);
        let feedback: String = self
            .stage(
                run,
                sink,
                Stage::GlobalCheck,
                &(&revised, &params, prompts.global_check.as_str()),
                || global_check(gateway, &prompts.global_check, &revised, &params),
            )
            .await?;
        let coherence = coherence_score(&feedback);
        if coherence < config.thresholds.coherence {
            warn!(
                "Coherence score {:.2} is below threshold {:.2}",
                coherence, config.thresholds.coherence
            );
        }
        if let Some(q) = run.quality_metrics.as_mut() {
            q.observe_global_check(&feedback);
        }

        // 7. EditPass2
        let params = config.stage_params(Stage::EditPass2);
        let policy = self.options.feedback_policy;
        let output: EditPass2Output = self
            .stage(
                run,
                sink,
                Stage::EditPass2,
                &(&revised, feedback.as_str(), &params, prompts.edit_pass2.as_str(), policy),
                || edit_pass2(gateway, &prompts.edit_pass2, &revised, &feedback, policy, &params),
            )
            .await?;
        if let Some(q) = run.quality_metrics.as_mut() {
            let included: Vec<_> = revised.keys().copied().collect();
            q.observe_final(&output.final_text, output.feedback.issues.len(), &included);
        }

        Ok(output.final_text)
    }

    /// Enter `stage`, run it through the cache wrapper and report progress
    /// on both sides of it
    async fn stage<T, I, F, Fut>(
        &self,
        run: &mut PipelineRun,
        sink: &mut dyn ProgressSink,
        stage: Stage,
        inputs: &I,
        compute: F,
    ) -> PipelineResult<T>
    where
        T: Serialize + DeserializeOwned,
        I: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        run.state = run.state.advance();
        debug_assert_eq!(run.state, PipelineState::Running(stage));
        sink.emit(ProgressEvent::started(stage));

        match self.runner.run(stage, inputs, compute).await {
            Ok(output) => {
                let shown = match &output.result.payload {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                sink.emit(ProgressEvent::finished(stage, output.result.from_cache, &shown));
                run.record(output.result);
                Ok(output.value)
            }
            Err(e) => {
                sink.emit(ProgressEvent::failed(stage, &e.to_string()));
                Err(e)
            }
        }
    }

    /// `final_result_<preset>_<timestamp>.json`
    fn persist(&self, run: &PipelineRun, timestamp: &str) -> PipelineResult<PathBuf> {
        let path = self.options.result_dir.join(format!(
            "final_result_{}_{}.json",
            self.config.preset, timestamp
        ));
        write_json_pretty(&path, run)?;
        Ok(path)
    }
}

impl<B: ChatBackend + 'static> Orchestrator<B> {
    /// Run on a background task, yielding progress events as stages start
    /// and finish. The receiver closes when the run ends; the handle carries
    /// the outcome.
    pub fn run_stream(
        self: Arc<Self>,
        text: String,
    ) -> (
        UnboundedReceiver<ProgressEvent>,
        JoinHandle<PipelineResult<PipelineRun>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            let mut sink = ChannelSink::new(tx);
            self.run(&text, &mut sink).await
        });
        (rx, handle)
    }

    /// Like [`Orchestrator::run_stream`], reading the paper from `path` so
    /// the run record keeps its input file
    pub fn run_stream_file(
        self: Arc<Self>,
        path: PathBuf,
    ) -> (
        UnboundedReceiver<ProgressEvent>,
        JoinHandle<PipelineResult<PipelineRun>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            let mut sink = ChannelSink::new(tx);
            self.run_file(&path, &mut sink).await
        });
        (rx, handle)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::config::{resolve, ConfigOverrides};
    use crate::error::PipelineError;
    use crate::llm::MockBackend;
    use crate::models::ProgressStatus;
    use crate::pipeline::NoProgress;

    const PAPER: &str = "A Study of Things\n\
        # Abstract\nWe study things carefully and report what we find about them.\n\
        # 1. Introduction\nThings matter because people use them every day (Smith, 2020).\n\
        # 2 Method\nWe measured things with a calibrated instrument over two weeks.\n\
        # Discussion\nThings were larger than expected in most of the trials we ran.\n\
        # Conclusion\nWe conclude that things deserve further careful study.\n";

    fn config() -> ResolvedConfig {
        let overrides = ConfigOverrides {
            retry_delay_ms: Some(0),
            ..Default::default()
        };
        resolve("balanced", Some(&overrides)).unwrap()
    }

    fn options(dir: &Path) -> RunOptions {
        RunOptions {
            result_dir: dir.to_path_buf(),
            ..RunOptions::default()
        }
    }

    fn files_with_prefix(dir: &Path, prefix: &str) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(prefix))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_mock_run_completes_all_stages() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(MockBackend::new(), config(), options(dir.path())).unwrap();

        let run = orchestrator.run(PAPER, &mut NoProgress).await.unwrap();

        assert_eq!(run.state, PipelineState::Done);
        assert_eq!(run.completed_stages(), Stage::ALL.to_vec());
        assert!(run.final_output.as_deref().unwrap().starts_with("# Revised Paper"));
        assert!(run.error.is_none());

        let backend = orchestrator.gateway().backend();
        assert_eq!(backend.calls_for(Stage::Build), 7);
        assert_eq!(backend.calls_for(Stage::EditPass1), 5);
        assert_eq!(backend.calls_for(Stage::GlobalCheck), 1);
        assert_eq!(backend.calls_for(Stage::EditPass2), 1);
        assert_eq!(run.performance_metrics.api_calls as usize, backend.total_calls());
        assert!(run.performance_metrics.estimated_cost > 0.0);

        let quality = run.quality_metrics.as_ref().unwrap();
        assert!((0.0..=1.0).contains(&quality.overall_score));

        assert_eq!(files_with_prefix(dir.path(), "final_result_balanced_").len(), 1);
        assert_eq!(files_with_prefix(dir.path(), "final_paper_").len(), 1);
        assert_eq!(files_with_prefix(dir.path(), "summary_").len(), 1);
        for stage in Stage::ALL {
            let prefix = format!("{}_{}_", stage.step(), stage);
            assert_eq!(files_with_prefix(dir.path(), &prefix).len(), 1, "{prefix}");
        }
    }

    #[tokio::test]
    async fn test_audit_failure_persists_partial_run() {
        let dir = TempDir::new().unwrap();
        let backend = MockBackend::new().failing_on(Stage::Audit);
        let orchestrator = Orchestrator::new(backend, config(), options(dir.path())).unwrap();

        let mut events = Vec::new();
        let mut sink = |event: ProgressEvent| events.push(event);
        let err = orchestrator.run(PAPER, &mut sink).await.unwrap_err();

        match &err {
            PipelineError::ExternalCall { stage, attempts, .. } => {
                assert_eq!(*stage, Stage::Audit);
                assert_eq!(*attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        // The first criterion exhausts its budget and stops the stage
        assert_eq!(orchestrator.gateway().backend().calls_for(Stage::Audit), 3);
        assert_eq!(orchestrator.gateway().backend().calls_for(Stage::EditPass1), 0);

        let last = events.last().unwrap();
        assert_eq!(last.name, "Audit");
        assert_eq!(last.status, ProgressStatus::Failed);

        let records = files_with_prefix(dir.path(), "final_result_");
        assert_eq!(records.len(), 1);
        let record: Value = serde_json::from_str(&std::fs::read_to_string(&records[0]).unwrap()).unwrap();
        assert_eq!(record["state"]["status"], "failed");
        assert_eq!(record["state"]["stage"], "audit");
        assert_eq!(record["failed_stage"], "audit");
        let completed: Vec<&str> = record["stage_results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["stage_name"].as_str().unwrap())
            .collect();
        assert_eq!(completed, vec!["split", "build", "fuse"]);
        assert!(record["error"].as_str().unwrap().contains("3 attempt"));
        assert!(files_with_prefix(dir.path(), "final_paper_").is_empty());
    }

    #[tokio::test]
    async fn test_second_run_is_served_from_cache() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(MockBackend::new(), config(), options(dir.path())).unwrap();

        orchestrator.run(PAPER, &mut NoProgress).await.unwrap();
        let calls = orchestrator.gateway().backend().total_calls();

        let second = orchestrator.run(PAPER, &mut NoProgress).await.unwrap();
        assert_eq!(orchestrator.gateway().backend().total_calls(), calls);
        assert_eq!(second.performance_metrics.cache_hits, 7);
        assert_eq!(second.performance_metrics.api_calls, 0);
        assert!(second.stage_results.iter().all(|r| r.from_cache));
        assert_eq!(second.state, PipelineState::Done);
    }

    #[tokio::test]
    async fn test_stream_reports_each_stage_in_order() {
        let dir = TempDir::new().unwrap();
        let orchestrator =
            Arc::new(Orchestrator::new(MockBackend::new(), config(), options(dir.path())).unwrap());

        let (mut rx, handle) = orchestrator.run_stream(PAPER.to_string());
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let run = handle.await.unwrap().unwrap();

        assert_eq!(run.state, PipelineState::Done);
        assert_eq!(events.len(), 14);
        for (i, pair) in events.chunks(2).enumerate() {
            assert_eq!(pair[0].step, i + 1);
            assert_eq!(pair[0].status, ProgressStatus::Started);
            assert!(pair[0].preview.is_none());
            assert_eq!(pair[1].step, i + 1);
            assert_eq!(pair[1].status, ProgressStatus::Completed);
            assert!(pair[1].preview.as_ref().unwrap().chars().count() <= 503);
        }
        assert_eq!(events[13].name, "EditPass2");
    }

    #[tokio::test]
    async fn test_no_intermediate_files_when_disabled() {
        let dir = TempDir::new().unwrap();
        let options = RunOptions {
            save_intermediate: false,
            enable_caching: false,
            enable_metrics: false,
            generate_summary: false,
            ..options(dir.path())
        };
        let orchestrator = Orchestrator::new(MockBackend::new(), config(), options).unwrap();

        let run = orchestrator.run(PAPER, &mut NoProgress).await.unwrap();
        assert!(run.quality_metrics.is_none());

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2, "{names:?}");
        assert!(names[0].starts_with("final_paper_"));
        assert!(names[1].starts_with("final_result_"));
    }

    #[tokio::test]
    async fn test_split_limits_truncate_before_build() {
        let dir = TempDir::new().unwrap();
        let mut options = options(dir.path());
        options.split.max_section_length = Some(10);
        let orchestrator = Orchestrator::new(MockBackend::new(), config(), options).unwrap();

        let run = orchestrator.run(PAPER, &mut NoProgress).await.unwrap();
        let split: Sections =
            serde_json::from_value(run.result_for(Stage::Split).unwrap().payload.clone()).unwrap();
        assert_eq!(split.get(SectionName::Method), "We measure");
        assert_eq!(split.preamble, "A Study of Things");
    }

    #[tokio::test]
    async fn test_missing_prompt_dir_fails_construction() {
        let options = RunOptions {
            prompt_dir: Some(PathBuf::from("/no/such/prompts")),
            ..RunOptions::default()
        };
        assert!(matches!(
            Orchestrator::new(MockBackend::new(), config(), options),
            Err(PipelineError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_file_records_input_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paper.txt");
        std::fs::write(&path, PAPER).unwrap();
        let orchestrator =
            Orchestrator::new(MockBackend::new(), config(), options(&dir.path().join("out"))).unwrap();

        let run = orchestrator.run_file(&path, &mut NoProgress).await.unwrap();
        assert_eq!(run.input_file.as_deref(), Some(path.as_path()));
        assert_eq!(run.input_hash, content_hash(PAPER));
    }

    #[tokio::test]
    async fn test_stream_file_records_input_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paper.md");
        std::fs::write(&path, PAPER).unwrap();
        let orchestrator = Arc::new(
            Orchestrator::new(MockBackend::new(), config(), options(&dir.path().join("out"))).unwrap(),
        );

        let (mut events, handle) = orchestrator.run_stream_file(path.clone());
        let mut count = 0;
        while events.recv().await.is_some() {
            count += 1;
        }
        let run = handle.await.unwrap().unwrap();

        assert_eq!(count, 14);
        assert_eq!(run.input_file.as_deref(), Some(path.as_path()));

        let record = files_with_prefix(&dir.path().join("out"), "final_result_").remove(0);
        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(record).unwrap()).unwrap();
        assert_eq!(saved["input_file"], path.to_string_lossy().as_ref());
    }

    #[tokio::test]
    async fn test_failed_final_write_marks_run_failed() {
        let dir = TempDir::new().unwrap();
        // A plain file where the result directory should be
        let blocked = dir.path().join("results");
        std::fs::write(&blocked, "not a directory").unwrap();
        let options = RunOptions {
            save_intermediate: false,
            enable_caching: false,
            ..options(&blocked)
        };
        let orchestrator = Orchestrator::new(MockBackend::new(), config(), options).unwrap();

        let mut events = Vec::new();
        let mut sink = |event: ProgressEvent| events.push(event);
        let err = orchestrator.run(PAPER, &mut sink).await.unwrap_err();

        assert!(matches!(err, PipelineError::Io { .. }));
        assert_eq!(events.len(), 15);
        let last = events.last().unwrap();
        assert_eq!(last.step, 7);
        assert_eq!(last.status, ProgressStatus::Failed);
        assert!(events[..14].iter().all(|e| e.status != ProgressStatus::Failed));
    }
}

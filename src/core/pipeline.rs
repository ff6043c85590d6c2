//! Fail-fast job pipelines.
//!
//! A pipeline runs an ordered list of steps, threading a state value from
//! one job to the next. The first failing step ends the run: the failure is
//! handed to the pipeline's failure handler (or logged) and no later step
//! executes. Nothing is retried.

use std::fmt;
use std::future::Future;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error};

/// A deferred unit of work executed as one step of a pipeline.
///
/// The job receives the current pipeline state by value and returns the
/// state handed to the next job.
#[async_trait]
pub trait Job<S: Send + 'static>: Send {
    /// Human-readable description used in logs and failure reports
    fn label(&self) -> &str;

    /// Run the job
    async fn execute(&mut self, state: S) -> Result<S>;
}

/// Job backed by a closure returning a future
pub struct FnJob<F> {
    label: String,
    f: F,
}

impl<F> FnJob<F> {
    pub fn new(label: impl Into<String>, f: F) -> Self {
        Self {
            label: label.into(),
            f,
        }
    }
}

#[async_trait]
impl<S, F, Fut> Job<S> for FnJob<F>
where
    S: Send + 'static,
    F: FnMut(S) -> Fut + Send + 'static,
    Fut: Future<Output = Result<S>> + Send + 'static,
{
    fn label(&self) -> &str {
        &self.label
    }

    async fn execute(&mut self, state: S) -> Result<S> {
        (self.f)(state).await
    }
}

/// One entry of a job list
pub enum Step<S: Send + 'static> {
    /// An executable job
    Run(Box<dyn Job<S>>),

    /// A step that could not be bound to anything executable.
    ///
    /// Running it fails exactly like a job returning an error.
    Unbound(String),
}

impl<S: Send + 'static> Step<S> {
    pub fn label(&self) -> &str {
        match self {
            Step::Run(job) => job.label(),
            Step::Unbound(label) => label,
        }
    }
}

impl<S> fmt::Debug for Step<S>
where
    S: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Run(job) => f.debug_tuple("Run").field(&job.label()).finish(),
            Step::Unbound(label) => f.debug_tuple("Unbound").field(label).finish(),
        }
    }
}

/// Wrap a closure as a pipeline step
pub fn job<S, F, Fut>(label: impl Into<String>, f: F) -> Step<S>
where
    S: Send + 'static,
    F: FnMut(S) -> Fut + Send + 'static,
    Fut: Future<Output = Result<S>> + Send + 'static,
{
    Step::Run(Box::new(FnJob::new(label, f)))
}

/// Wrap a side-effecting closure that leaves the pipeline state untouched
pub fn effect<S, F, Fut>(label: impl Into<String>, mut f: F) -> Step<S>
where
    S: Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    job(label, move |state: S| {
        let pending = f();
        async move { pending.await.map(|()| state) }
    })
}

/// Failure raised while running a pipeline step
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("job '{0}' is not callable")]
    NotCallable(String),

    #[error("job '{job}' failed: {error:#}")]
    JobFailed { job: String, error: anyhow::Error },
}

/// Callback receiving `(job label, error)` for the failing step
pub type FailureHandler = Box<dyn FnMut(&str, &PipelineError) + Send>;

/// Terminal status of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Every step ran successfully
    Completed { jobs_run: usize },

    /// The step at `position` (0-indexed) failed; later steps never ran
    Failed {
        position: usize,
        job: String,
        error: String,
    },
}

impl RunStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunStatus::Completed { .. })
    }
}

/// Result of one pipeline run
#[derive(Debug)]
pub struct PipelineRun<S> {
    /// State produced by the last successful job (the initial state if none ran)
    pub state: S,
    pub status: RunStatus,
}

/// An ordered job list with its failure handling
pub struct Pipeline<S: Send + 'static> {
    name: String,
    steps: Vec<Step<S>>,
    on_failure: Option<FailureHandler>,
}

impl<S> Pipeline<S>
where
    S: Clone + Send + 'static,
{
    pub fn new(name: impl Into<String>, steps: Vec<Step<S>>) -> Self {
        Self {
            name: name.into(),
            steps,
            on_failure: None,
        }
    }

    /// Replace the default logging failure handler
    pub fn with_failure_handler(
        mut self,
        handler: impl FnMut(&str, &PipelineError) + Send + 'static,
    ) -> Self {
        self.on_failure = Some(Box::new(handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Labels of every step, in order
    pub fn labels(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.label().to_string()).collect()
    }

    /// Run the steps in order, stopping at the first failure.
    ///
    /// Consumes the pipeline: a finished run cannot be restarted, build a
    /// fresh job list instead.
    pub async fn run(mut self, initial: S) -> PipelineRun<S> {
        let labels = self.labels();
        let mut steps = std::mem::take(&mut self.steps);
        let mut state = initial;

        for (position, step) in steps.iter_mut().enumerate() {
            let failure = match step {
                Step::Unbound(label) => PipelineError::NotCallable(label.clone()),
                Step::Run(job) => {
                    debug!(pipeline = %self.name, job = job.label(), "Running job");
                    match job.execute(state.clone()).await {
                        Ok(next) => {
                            state = next;
                            continue;
                        }
                        Err(e) => PipelineError::JobFailed {
                            job: job.label().to_string(),
                            error: e,
                        },
                    }
                }
            };

            let job_label = step.label().to_string();
            self.handle_failure(&labels, &job_label, &failure);

            return PipelineRun {
                state,
                status: RunStatus::Failed {
                    position,
                    job: job_label,
                    error: failure.to_string(),
                },
            };
        }

        PipelineRun {
            state,
            status: RunStatus::Completed {
                jobs_run: labels.len(),
            },
        }
    }

    fn handle_failure(&mut self, labels: &[String], job: &str, failure: &PipelineError) {
        match self.on_failure.as_mut() {
            Some(handler) => handler(job, failure),
            None => {
                error!(
                    pipeline = %self.name,
                    jobs = ?labels,
                    job,
                    error = %failure,
                    "Run jobs {:?} failed on '{}'",
                    labels,
                    job
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording(log: &Log, name: &str) -> Step<u32> {
        let log = log.clone();
        let name = name.to_string();
        job(name.clone(), move |n: u32| {
            let log = log.clone();
            let name = name.clone();
            async move {
                log.lock().unwrap().push(name);
                Ok(n + 1)
            }
        })
    }

    fn failing(log: &Log, name: &str) -> Step<u32> {
        let log = log.clone();
        let name = name.to_string();
        job(name.clone(), move |_n: u32| {
            let log = log.clone();
            let name = name.clone();
            async move {
                log.lock().unwrap().push(name.clone());
                anyhow::bail!("{} exploded", name)
            }
        })
    }

    #[tokio::test]
    async fn test_all_jobs_run_in_order() {
        let log: Log = Default::default();
        let failures: Log = Default::default();
        let sink = failures.clone();

        let pipeline = Pipeline::new(
            "ordered",
            vec![
                recording(&log, "a"),
                recording(&log, "b"),
                recording(&log, "c"),
            ],
        )
        .with_failure_handler(move |job, _| sink.lock().unwrap().push(job.to_string()));

        let run = pipeline.run(0).await;

        assert_eq!(run.status, RunStatus::Completed { jobs_run: 3 });
        assert_eq!(run.state, 3);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert!(failures.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_stops_remaining_jobs() {
        let log: Log = Default::default();
        let failures: Log = Default::default();
        let sink = failures.clone();

        let pipeline = Pipeline::new(
            "truncated",
            vec![
                recording(&log, "a"),
                failing(&log, "b"),
                recording(&log, "c"),
            ],
        )
        .with_failure_handler(move |job, error| {
            sink.lock().unwrap().push(format!("{}: {}", job, error));
        });

        let run = pipeline.run(10).await;

        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(
            *failures.lock().unwrap(),
            vec!["b: job 'b' failed: b exploded".to_string()]
        );
        // State from the last successful job survives the failure
        assert_eq!(run.state, 11);
        match run.status {
            RunStatus::Failed { position, job, .. } => {
                assert_eq!(position, 1);
                assert_eq!(job, "b");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unbound_step_behaves_like_failure() {
        let log: Log = Default::default();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();

        let pipeline = Pipeline::new(
            "unbound",
            vec![
                recording(&log, "a"),
                Step::Unbound("restore without snapshot".to_string()),
                recording(&log, "c"),
            ],
        )
        .with_failure_handler(move |_, error| {
            sink.lock()
                .unwrap()
                .push(matches!(error, PipelineError::NotCallable(_)));
        });

        let run = pipeline.run(0).await;

        assert_eq!(*log.lock().unwrap(), vec!["a"]);
        assert_eq!(*errors.lock().unwrap(), vec![true]);
        assert!(!run.status.is_completed());
    }

    #[tokio::test]
    async fn test_first_job_failure_runs_nothing_else() {
        let log: Log = Default::default();
        let pipeline = Pipeline::new("first", vec![failing(&log, "a"), recording(&log, "b")]);

        // Default handler only logs
        let run = pipeline.run(0).await;

        assert_eq!(*log.lock().unwrap(), vec!["a"]);
        assert_eq!(run.state, 0);
        assert!(matches!(run.status, RunStatus::Failed { position: 0, .. }));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_handler_logs_job_list_and_error() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let log: Log = Default::default();
        let pipeline = Pipeline::new(
            "teardown",
            vec![
                recording(&log, "load"),
                failing(&log, "migrate"),
                recording(&log, "notify"),
            ],
        );
        pipeline.run(0).await;

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("ERROR"), "{}", output);
        assert!(
            output.contains(r#"Run jobs ["load", "migrate", "notify"] failed on 'migrate'"#),
            "{}",
            output
        );
        assert!(output.contains("migrate exploded"), "{}", output);
    }

    #[tokio::test]
    async fn test_empty_pipeline_completes() {
        let pipeline: Pipeline<()> = Pipeline::new("empty", Vec::new());
        assert!(pipeline.is_empty());

        let run = pipeline.run(()).await;
        assert_eq!(run.status, RunStatus::Completed { jobs_run: 0 });
    }

    #[tokio::test]
    async fn test_effect_passes_state_through() {
        let log: Log = Default::default();
        let sink = log.clone();
        let pipeline = Pipeline::new(
            "effects",
            vec![
                recording(&log, "a"),
                effect("notify", move || {
                    let sink = sink.clone();
                    async move {
                        sink.lock().unwrap().push("notify".to_string());
                        Ok::<(), anyhow::Error>(())
                    }
                }),
                recording(&log, "c"),
            ],
        );

        let run = pipeline.run(5).await;

        assert_eq!(run.state, 7);
        assert_eq!(*log.lock().unwrap(), vec!["a", "notify", "c"]);
    }

    #[test]
    fn test_labels() {
        let log: Log = Default::default();
        let pipeline = Pipeline::new(
            "labels",
            vec![recording(&log, "first"), Step::Unbound("second".into())],
        );
        assert_eq!(pipeline.labels(), vec!["first", "second"]);
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.name(), "labels");
    }
}

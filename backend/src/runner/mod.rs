//! Run orchestration.
//!
//! The [`Runner`] is a single worker task that owns the run [`State`]. Clients
//! talk to it through a [`RunnerHandle`]: commands go in over an mpsc
//! channel, status and questions come back over broadcast and watch
//! channels.
//!
//! ```text
//!   RunnerHandle ──Command──▶ Runner ──RunEvent──▶ subscribers (SSE, CLI)
//!                               │
//!        load stores ──▶ order ──▶ execute each ──▶ save ──▶ score ──▶ TOTAL.csv
//!                                     │   ▲
//!                          Suspended  ▼   │ all questions settled
//!                               wait for Answer / IgnoreAll / Stop
//! ```
//!
//! Stop is honoured between transformers and while waiting on questions.
//! Whatever was produced so far is saved and the runner returns to idle.

pub mod order;
pub mod output;
pub mod rebate_set;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::logs::{log_error, log_info, log_info_indent, log_success, log_warning};
use crate::config::{Layout, Settings};
use crate::context::{Filter, Time};
use crate::error::{RunResult, ServerError, ServerResult};
use crate::resolve::{Answer, Question};
use crate::state::State;
use crate::stats::{Issue, RunReport};
use crate::store::{gather, FileBackedStore};
use crate::transformer::{execute, AdvancedTransformer, Run, TransformerFile};

pub use order::order;
pub use output::{compile_rebates, load_truth};
pub use rebate_set::{compare, discrepancies, rebates_equal, RebateSet, TOLERANCE};

const EVENT_CAPACITY: usize = 1024;

// =============================================================================
// Protocol
// =============================================================================

/// A request to the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Start a run, optionally overriding the configured filter.
    Start {
        #[serde(default)]
        filter: Option<Filter>,
    },
    Stop,
    Answer(Answer),
    IgnoreAll,
}

/// Where the runner is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Loading { message: String },
    /// Fraction of transformers finished, `0.0..=1.0`.
    Running { progress: f64 },
    Done { report: RunReport },
    Error { message: String },
}

impl RunStatus {
    fn loading(message: &str) -> Self {
        RunStatus::Loading { message: message.to_string() }
    }

    /// Whether no run is in progress.
    pub fn is_settled(&self) -> bool {
        matches!(self, RunStatus::Idle | RunStatus::Done { .. } | RunStatus::Error { .. })
    }
}

/// What subscribers receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RunEvent {
    Status(RunStatus),
    Question(Question),
}

enum Finish {
    Done(RunReport),
    Stopped,
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable client side of a [`Runner`].
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<RunEvent>,
    status: watch::Receiver<RunStatus>,
    questions: watch::Receiver<Vec<Question>>,
}

impl RunnerHandle {
    pub fn send(&self, command: Command) -> ServerResult<()> {
        self.commands.send(command).map_err(|_| ServerError::RunnerGone)
    }

    pub fn start(&self, filter: Option<Filter>) -> ServerResult<()> {
        self.send(Command::Start { filter })
    }

    pub fn stop(&self) -> ServerResult<()> {
        self.send(Command::Stop)
    }

    pub fn answer(&self, answer: Answer) -> ServerResult<()> {
        self.send(Command::Answer(answer))
    }

    pub fn ignore_all(&self) -> ServerResult<()> {
        self.send(Command::IgnoreAll)
    }

    /// Events from now on. Subscribe before sending `Start` to see the whole run.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> RunStatus {
        self.status.borrow().clone()
    }

    /// Questions currently waiting for an answer.
    pub fn questions(&self) -> Vec<Question> {
        self.questions.borrow().clone()
    }
}

// =============================================================================
// Runner
// =============================================================================

/// The run worker. Create with [`Runner::new`], then [`Runner::spawn`] it.
pub struct Runner {
    settings: Settings,
    state: State,
    commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<RunEvent>,
    status: watch::Sender<RunStatus>,
    questions: watch::Sender<Vec<Question>>,
}

impl Runner {
    pub fn new(settings: Settings) -> (Self, RunnerHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (status_tx, status_rx) = watch::channel(RunStatus::Idle);
        let (questions_tx, questions_rx) = watch::channel(Vec::new());

        let handle = RunnerHandle {
            commands: command_tx,
            events: events.clone(),
            status: status_rx,
            questions: questions_rx,
        };
        let runner = Self {
            settings,
            state: State::new(),
            commands: command_rx,
            events,
            status: status_tx,
            questions: questions_tx,
        };
        (runner, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.serve())
    }

    /// Process commands until every handle is dropped.
    pub async fn serve(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Start { filter } => self.start(filter).await,
                other => debug!(command = ?other, "no run in progress"),
            }
        }
        debug!("runner stopped");
    }

    fn set_status(&self, status: RunStatus) {
        if let RunStatus::Loading { message } = &status {
            log_info(message.clone());
        }
        self.status.send_replace(status.clone());
        // No subscribers is fine.
        let _ = self.events.send(RunEvent::Status(status));
    }

    fn publish_questions(&mut self) {
        self.questions.send_replace(self.state.tracker.pending().to_vec());
        for question in self.state.tracker.take_new() {
            let _ = self.events.send(RunEvent::Question(question));
        }
    }

    async fn start(&mut self, filter: Option<Filter>) {
        let status = match self.run(filter).await {
            Ok(Finish::Done(report)) => {
                log_success(format!(
                    "Run finished: {} transformers, {} issues",
                    report.performance.len(),
                    report.issues.len()
                ));
                RunStatus::Done { report }
            }
            Ok(Finish::Stopped) => {
                log_warning("Run stopped");
                self.set_status(RunStatus::loading("Saving data..."));
                match self.state.save().await {
                    Ok(_) => RunStatus::Idle,
                    Err(e) => RunStatus::Error { message: e.to_string() },
                }
            }
            Err(e) => {
                log_error(e.to_string());
                RunStatus::Error { message: e.to_string() }
            }
        };
        self.questions.send_replace(Vec::new());
        self.set_status(status);
    }

    async fn run(&mut self, filter: Option<Filter>) -> RunResult<Finish> {
        let mut context = self.settings.context()?;
        if let Some(filter) = filter {
            context.filter = filter;
        }
        let layout = context.layout.clone();
        let time = context.time;

        self.state.reset();
        self.questions.send_replace(Vec::new());
        let mut report = RunReport::default();
        info!(time = %time, "run started");

        // 1. Transformers. A broken file is reported and left out.
        self.set_status(RunStatus::loading("Reading transformers..."));
        let mut files: FileBackedStore<TransformerFile> = FileBackedStore::new();
        for failure in files.load(gather(&layout.transformers(), &["json"])).await {
            warn!(file = %failure.path.display(), error = %failure.error, "invalid transformer");
            log_warning(format!("Skipping {}: {}", failure.path.display(), failure.error));
            report.issues.push(Issue::InvalidTransformer {
                file: failure.path.display().to_string(),
                reason: failure.error.to_string(),
            });
        }
        let selected: Vec<AdvancedTransformer> = files
            .iter()
            .map(|f| f.transformer())
            .filter(|t| context.will_run(&t.name, &t.tags))
            .cloned()
            .collect();
        let ordered = order(selected)?;

        // 2. Tables. Any failure here aborts the run.
        self.set_status(RunStatus::loading("Loading sources..."));
        self.load_tables(&layout, &time).await?;
        let truth = if self.settings.testing.compare {
            Some(load_truth(&layout, &time).await?)
        } else {
            None
        };

        // 3. Transformers, one at a time.
        let total = ordered.len();
        self.set_status(RunStatus::Running { progress: 0.0 });
        for (i, transformer) in ordered.iter().enumerate() {
            if self.stop_requested(&layout) {
                return Ok(Finish::Stopped);
            }
            log_info_indent(format!("Running '{}'", transformer.name), 1);

            loop {
                match execute(transformer, &context, &mut self.state, &mut report)? {
                    Run::Done => break,
                    Run::Suspended(hashes) => {
                        log_warning(format!(
                            "'{}' is waiting on {} question(s)",
                            transformer.name,
                            hashes.len()
                        ));
                        self.publish_questions();
                        if !self.settle(&layout, &hashes).await {
                            return Ok(Finish::Stopped);
                        }
                    }
                }
            }

            self.set_status(RunStatus::Running { progress: (i + 1) as f64 / total as f64 });
        }

        // 4. Persist, score, aggregate.
        self.set_status(RunStatus::loading("Saving data..."));
        let written = self.state.save().await?;
        debug!(files = written, "stores saved");

        if let Some(truth) = truth {
            self.set_status(RunStatus::loading("Scoring accuracy..."));
            report.discrepancy = Some(discrepancies(
                self.state.produced(),
                truth,
                self.settings.testing.compare_all,
            ));
        }

        self.set_status(RunStatus::loading("Compiling rebates..."));
        let (path, count) = compile_rebates(&layout, &time).await?;
        log_success(format!("Wrote {} rebates to {}", count, path.display()));
        report.output = Some(path);

        Ok(Finish::Done(report))
    }

    /// Reload reference tables and the quarter's utility tables.
    async fn load_tables(&mut self, layout: &Layout, time: &Time) -> RunResult<()> {
        let references = gather(&layout.references(), &["csv"]);
        if let Some(failure) = self.state.references.load(references).await.into_iter().next() {
            return Err(failure.error.into());
        }

        // Debug dumps live below the utility folder and are not tables.
        let root = layout.utilities(time);
        let utilities = gather(&root, &["csv"])
            .into_iter()
            .filter(|p| p.parent() == Some(root.as_path()))
            .collect();
        if let Some(failure) = self.state.utilities.load(utilities).await.into_iter().next() {
            return Err(failure.error.into());
        }

        debug!(
            references = self.state.references.len(),
            utilities = self.state.utilities.len(),
            "tables loaded"
        );
        Ok(())
    }

    /// Apply a command received mid-run. Returns `true` on stop.
    fn handle(&mut self, layout: &Layout, command: Command) -> bool {
        match command {
            Command::Stop => return true,
            Command::Answer(answer) => {
                if self.state.apply_answer(layout, answer).is_none() {
                    debug!("answer for a question that is not pending");
                }
            }
            Command::IgnoreAll => {
                let ignored = self.state.tracker.ignore_all();
                log_info(format!("Ignoring {} pending and all future questions", ignored.len()));
            }
            Command::Start { .. } => warn!("run already in progress"),
        }
        self.publish_questions();
        false
    }

    /// Drain queued commands without waiting.
    fn stop_requested(&mut self, layout: &Layout) -> bool {
        while let Ok(command) = self.commands.try_recv() {
            if self.handle(layout, command) {
                return true;
            }
        }
        false
    }

    /// Wait until every hash is answered or ignored. Returns `false` on stop.
    async fn settle(&mut self, layout: &Layout, hashes: &[String]) -> bool {
        while !self.state.tracker.all_settled(hashes) {
            match self.commands.recv().await {
                Some(command) => {
                    if self.handle(layout, command) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}

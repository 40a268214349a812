//! Device sink streaming engine.
//!
//! The engine owns the sample pipeline (source → interpolator → sink) on a
//! dedicated thread and talks to its controller through two message queues
//! plus a small synchronous control surface. Configuration messages are
//! applied only between sample blocks, so a block is never produced under
//! half-applied settings.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use thiserror::Error;

use crate::interp::Interpolator;
use crate::message::{Message, MessageQueue, Waker};
use crate::sample::Sample;
use crate::settings::SinkSettings;
use crate::sink::{SampleSink, SinkFormat};
use crate::source::SampleSource;

pub const DEFAULT_BLOCK_SIZE: usize = 1024;

const CONTROL_QUEUE_CAPACITY: usize = 4;
const CONTROL_ACK_TIMEOUT: Duration = Duration::from_secs(10);
const START_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_PARK: Duration = Duration::from_millis(20);
const STARVED_PARK: Duration = Duration::from_millis(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    NotStarted,
    Idle,
    Running,
    Error,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::NotStarted => write!(f, "not started"),
            State::Idle => write!(f, "idle"),
            State::Running => write!(f, "running"),
            State::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine already started")]
    AlreadyStarted,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread did not report ready")]
    StartTimeout,
}

enum ControlCommand {
    StartGeneration { ack: Sender<bool> },
    StopGeneration { ack: Sender<()> },
    Shutdown,
}

struct SharedStatus {
    state: State,
    error_message: Option<String>,
    settings: SinkSettings,
}

pub struct DeviceSinkEngine {
    input_queue: Arc<MessageQueue>,
    output_queue: Arc<MessageQueue>,
    status: Arc<Mutex<SharedStatus>>,
    waker: Arc<Waker>,
    control_tx: Sender<ControlCommand>,
    control_rx: Option<Receiver<ControlCommand>>,
    pipeline: Option<(Box<dyn SampleSource>, Box<dyn SampleSink>)>,
    block_size: usize,
    worker: Option<JoinHandle<()>>,
}

impl DeviceSinkEngine {
    pub fn new(source: Box<dyn SampleSource>, sink: Box<dyn SampleSink>) -> Self {
        Self::with_block_size(source, sink, DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(
        source: Box<dyn SampleSource>,
        sink: Box<dyn SampleSink>,
        block_size: usize,
    ) -> Self {
        let waker = Arc::new(Waker::new());
        let input_queue = Arc::new(MessageQueue::new());
        let wake = Arc::clone(&waker);
        input_queue.set_notifier(move || wake.wake());

        let (control_tx, control_rx) = channel::bounded(CONTROL_QUEUE_CAPACITY);

        DeviceSinkEngine {
            input_queue,
            output_queue: Arc::new(MessageQueue::new()),
            status: Arc::new(Mutex::new(SharedStatus {
                state: State::NotStarted,
                error_message: None,
                settings: SinkSettings::default(),
            })),
            waker,
            control_tx,
            control_rx: Some(control_rx),
            pipeline: Some((source, sink)),
            block_size: block_size.max(1),
            worker: None,
        }
    }

    /// Queue the controller pushes `ConfigureSink` / `RequestStreamTiming` to.
    pub fn input_message_queue(&self) -> Arc<MessageQueue> {
        Arc::clone(&self.input_queue)
    }

    /// Queue the engine pushes reports to; read by the controller only.
    pub fn output_message_queue(&self) -> Arc<MessageQueue> {
        Arc::clone(&self.output_queue)
    }

    pub fn state(&self) -> State {
        self.status.lock().unwrap().state
    }

    pub fn error_message(&self) -> Option<String> {
        self.status.lock().unwrap().error_message.clone()
    }

    /// Snapshot of the active configuration.
    pub fn settings(&self) -> SinkSettings {
        self.status.lock().unwrap().settings.clone()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Spawn the engine's execution context: NotStarted → Idle.
    pub fn start(&mut self) -> Result<(), EngineError> {
        let (control_rx, (source, sink)) = match (self.control_rx.take(), self.pipeline.take()) {
            (Some(rx), Some(pipeline)) => (rx, pipeline),
            _ => return Err(EngineError::AlreadyStarted),
        };

        let (ready_tx, ready_rx) = channel::bounded(1);
        let worker = EngineWorker {
            source,
            sink,
            settings: self.settings(),
            interpolator: Interpolator::new(0),
            samples_count: 0,
            state: State::NotStarted,
            scratch_in: vec![Sample::zero(); self.block_size],
            scratch_out: Vec::new(),
            input_queue: Arc::clone(&self.input_queue),
            output_queue: Arc::clone(&self.output_queue),
            status: Arc::clone(&self.status),
            waker: Arc::clone(&self.waker),
            control_rx,
        };

        let handle = std::thread::Builder::new()
            .name("sink-engine".to_string())
            .spawn(move || worker.run(ready_tx))?;
        self.worker = Some(handle);

        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(()) => Ok(()),
            Err(_) => Err(EngineError::StartTimeout),
        }
    }

    /// Idle → Running. Returns whether the stream is generating afterwards;
    /// on failure the engine is left in `Error` with a retrievable message.
    pub fn start_generation(&self) -> bool {
        if self.worker.is_none() {
            log::warn!("start_generation before engine start");
            return false;
        }
        let (ack_tx, ack_rx) = channel::bounded(1);
        if self
            .control_tx
            .send(ControlCommand::StartGeneration { ack: ack_tx })
            .is_err()
        {
            return false;
        }
        self.waker.wake();
        ack_rx.recv_timeout(CONTROL_ACK_TIMEOUT).unwrap_or(false)
    }

    /// Running/Error → Idle. Safe to call in any state.
    pub fn stop_generation(&self) {
        if self.worker.is_none() {
            return;
        }
        let (ack_tx, ack_rx) = channel::bounded(1);
        if self
            .control_tx
            .send(ControlCommand::StopGeneration { ack: ack_tx })
            .is_err()
        {
            return;
        }
        self.waker.wake();
        let _ = ack_rx.recv_timeout(CONTROL_ACK_TIMEOUT);
    }
}

impl Drop for DeviceSinkEngine {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.control_tx.send(ControlCommand::Shutdown);
            self.waker.wake();
            let _ = worker.join();
        }
    }
}

struct EngineWorker {
    source: Box<dyn SampleSource>,
    sink: Box<dyn SampleSink>,
    settings: SinkSettings,
    interpolator: Interpolator,
    samples_count: u64,
    state: State,
    scratch_in: Vec<Sample>,
    scratch_out: Vec<Sample>,
    input_queue: Arc<MessageQueue>,
    output_queue: Arc<MessageQueue>,
    status: Arc<Mutex<SharedStatus>>,
    waker: Arc<Waker>,
    control_rx: Receiver<ControlCommand>,
}

impl EngineWorker {
    fn run(mut self, ready: Sender<()>) {
        self.set_state(State::Idle, None);
        let _ = ready.send(());

        loop {
            let mut shutdown = false;
            while let Ok(cmd) = self.control_rx.try_recv() {
                if self.handle_control(cmd) {
                    shutdown = true;
                    break;
                }
            }
            if shutdown {
                break;
            }

            // Block boundary: all pending reconfiguration lands here.
            self.drain_messages();

            if self.state == State::Running {
                if !self.produce_block() {
                    self.waker.wait_timeout(STARVED_PARK);
                }
            } else {
                self.waker.wait_timeout(IDLE_PARK);
            }
        }

        if self.state == State::Running {
            self.sink.close();
        }
        log::debug!("engine thread exiting");
    }

    /// Returns true on shutdown.
    fn handle_control(&mut self, cmd: ControlCommand) -> bool {
        match cmd {
            ControlCommand::StartGeneration { ack } => {
                let running = self.handle_start();
                let _ = ack.send(running);
                false
            }
            ControlCommand::StopGeneration { ack } => {
                self.handle_stop();
                let _ = ack.send(());
                false
            }
            ControlCommand::Shutdown => true,
        }
    }

    fn handle_start(&mut self) -> bool {
        match self.state {
            State::Running => true,
            State::Idle => {
                self.samples_count = 0;
                self.interpolator.reset();
                match self.sink.open(&self.sink_format()) {
                    Ok(()) => {
                        self.set_state(State::Running, None);
                        true
                    }
                    Err(e) => {
                        self.set_state(State::Error, Some(e.to_string()));
                        false
                    }
                }
            }
            State::Error => {
                log::warn!("start_generation refused in error state; stop first");
                false
            }
            State::NotStarted => false,
        }
    }

    fn handle_stop(&mut self) {
        match self.state {
            State::Running => {
                self.sink.close();
                self.set_state(State::Idle, None);
            }
            State::Error => self.set_state(State::Idle, None),
            State::Idle | State::NotStarted => {}
        }
    }

    fn drain_messages(&mut self) {
        while let Some(msg) = self.input_queue.pop() {
            match msg {
                Message::ConfigureSink(settings) => self.apply_settings(settings),
                Message::RequestStreamTiming => {
                    self.output_queue
                        .push(Message::ReportStreamTiming(self.samples_count));
                }
                Message::ReportStreamTiming(_) | Message::ReportState { .. } => {
                    log::debug!("ignoring report message on the input queue");
                }
            }
        }
    }

    fn apply_settings(&mut self, settings: SinkSettings) {
        if !settings.is_valid() {
            log::warn!(
                "rejecting sink settings: sample_rate={} log2_interp={}",
                settings.sample_rate,
                settings.log2_interp
            );
            return;
        }
        if settings == self.settings {
            return;
        }

        let format_changed = settings.effective_sample_rate()
            != self.settings.effective_sample_rate()
            || settings.center_frequency != self.settings.center_frequency;

        log::info!(
            "sink settings: center {} Hz, rate {} Hz, interpolation x{} ({} Hz out)",
            settings.center_frequency,
            settings.sample_rate,
            1u32 << settings.log2_interp,
            settings.effective_sample_rate()
        );

        self.interpolator = Interpolator::new(settings.log2_interp);
        self.source.set_sample_rate(settings.sample_rate);
        self.settings = settings.clone();
        self.status.lock().unwrap().settings = settings;

        if self.state == State::Running && format_changed {
            self.sink.close();
            if let Err(e) = self.sink.open(&self.sink_format()) {
                self.set_state(State::Error, Some(e.to_string()));
            }
        }
    }

    /// Produce and emit one block. Returns false when the source is starved.
    fn produce_block(&mut self) -> bool {
        let produced = self.source.fill(&mut self.scratch_in);
        if produced == 0 {
            return false;
        }

        self.interpolator
            .process(&self.scratch_in[..produced], &mut self.scratch_out);

        match self.sink.write(&self.scratch_out) {
            Ok(()) => {
                self.samples_count += self.scratch_out.len() as u64;
                true
            }
            Err(e) => {
                self.sink.close();
                self.set_state(State::Error, Some(e.to_string()));
                true
            }
        }
    }

    fn sink_format(&self) -> SinkFormat {
        SinkFormat {
            sample_rate: self.settings.effective_sample_rate(),
            center_frequency: self.settings.center_frequency,
        }
    }

    fn set_state(&mut self, state: State, message: Option<String>) {
        if state == State::Error {
            log::error!(
                "engine state {} -> {}: {}",
                self.state,
                state,
                message.as_deref().unwrap_or("unknown fault")
            );
        } else {
            log::info!("engine state {} -> {}", self.state, state);
        }

        self.state = state;
        {
            let mut status = self.status.lock().unwrap();
            status.state = state;
            status.error_message = message.clone();
        }
        self.output_queue.push(Message::ReportState { state, message });
    }
}

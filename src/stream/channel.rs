use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc,
    },
    thread,
};

use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};

use super::{
    communication::{EventSink, Relay},
    engine::{ComputeEngine, EngineLoader},
    error::{ChannelError, EngineError, SequenceError},
    protocol::{ChannelCommand, ChannelEvent, EnginePayload},
};

/// Load state of the engine hosted by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleState {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

impl ModuleState {
    /// Transitions only move forward, except `Ready -> Failed` on a crash.
    pub fn can_advance_to(self, next: ModuleState) -> bool {
        use ModuleState::*;
        matches!(
            (self, next),
            (Unloaded, Loading) | (Loading, Ready) | (Loading, Failed) | (Ready, Failed)
        )
    }
}

/// Handle to a compute engine hosted on its own thread.
///
/// The thread owns the engine and its [`ModuleState`]; this handle only
/// queues commands. Everything the thread has to say comes back through the
/// [`EventSink`] given to [`ComputeChannel::spawn`].
pub struct ComputeChannel {
    commands: Sender<ChannelCommand>,
    terminated: Arc<AtomicBool>,
    busy: Arc<AtomicBool>,
    load_requested: bool,
}

impl ComputeChannel {
    /// Starts the channel thread. The engine is not loaded until [`load`](Self::load).
    ///
    /// # Errors
    /// Returns `ChannelError::Spawn` if the OS refuses to create the thread.
    pub fn spawn<S: EventSink>(
        loader: Arc<dyn EngineLoader>,
        sink: S,
    ) -> Result<Self, ChannelError> {
        let (commands, rx) = mpsc::channel();
        let terminated = Arc::new(AtomicBool::new(false));
        let busy = Arc::new(AtomicBool::new(false));

        let relay = Relay::new(Box::new(sink), Arc::clone(&terminated));
        let worker = ChannelWorker::new(loader, relay, Arc::clone(&busy));

        thread::Builder::new()
            .name("compute-channel".into())
            .spawn(move || worker.serve(rx))?;

        debug!("compute channel thread spawned");
        Ok(Self {
            commands,
            terminated,
            busy,
            load_requested: false,
        })
    }

    /// Asks the thread to load the engine. Only the first call has an effect.
    ///
    /// # Errors
    /// Returns `ChannelError::Terminated` once the channel is closed.
    pub fn load(&mut self) -> Result<(), ChannelError> {
        self.ensure_open()?;
        if self.load_requested {
            warn!("load requested twice on the same channel, ignoring");
            return Ok(());
        }

        self.send(ChannelCommand::Load)?;
        self.load_requested = true;
        Ok(())
    }

    /// Queues a training run.
    ///
    /// # Errors
    /// Returns `ChannelError::Busy` while a previous run has not settled and
    /// `ChannelError::Terminated` once the channel is closed.
    pub fn run(&self, learning_rate: f64) -> Result<(), ChannelError> {
        self.ensure_open()?;
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ChannelError::Busy);
        }

        if let Err(e) = self.send(ChannelCommand::RunTraining { learning_rate }) {
            self.busy.store(false, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }

    /// Closes the channel. No message is emitted after this returns, even if
    /// the engine is still busy; its thread exits once the engine returns.
    pub fn terminate(&mut self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }

        // The thread may already be gone after a crash.
        let _ = self.commands.send(ChannelCommand::Terminate);
        info!("compute channel terminated");
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Whether a run was queued and has not emitted its terminal message yet.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.is_terminated() {
            Err(ChannelError::Terminated)
        } else {
            Ok(())
        }
    }

    fn send(&self, command: ChannelCommand) -> Result<(), ChannelError> {
        self.commands
            .send(command)
            .map_err(|_| ChannelError::Terminated)
    }
}

impl Drop for ComputeChannel {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// The loaded engine, created on load and handed to every run.
struct EngineContext {
    engine: Box<dyn ComputeEngine>,
    runs: u64,
}

/// State living on the channel thread.
struct ChannelWorker {
    loader: Arc<dyn EngineLoader>,
    relay: Relay,
    busy: Arc<AtomicBool>,
    module: ModuleState,
    context: Option<EngineContext>,
}

impl ChannelWorker {
    fn new(loader: Arc<dyn EngineLoader>, relay: Relay, busy: Arc<AtomicBool>) -> Self {
        Self {
            loader,
            relay,
            busy,
            module: ModuleState::Unloaded,
            context: None,
        }
    }

    /// Thread entry point. A panic anywhere below is reported as a crash.
    fn serve(mut self, commands: Receiver<ChannelCommand>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.serve_commands(&commands)));

        if let Err(payload) = outcome {
            self.crash(panic_message(payload.as_ref()));
        }
        debug!(emitted = self.relay.emitted(); "compute channel thread exiting");
    }

    fn serve_commands(&mut self, commands: &Receiver<ChannelCommand>) {
        for command in commands.iter() {
            match command {
                ChannelCommand::Load => self.load(),
                ChannelCommand::RunTraining { learning_rate } => self.run(learning_rate),
                ChannelCommand::Terminate => break,
            }

            if self.relay.is_terminated() {
                break;
            }
        }
    }

    fn advance(&mut self, next: ModuleState) {
        if self.module.can_advance_to(next) {
            debug!("module state {:?} -> {:?}", self.module, next);
            self.module = next;
        } else {
            warn!("refusing module transition {:?} -> {:?}", self.module, next);
        }
    }

    fn load(&mut self) {
        if self.module != ModuleState::Unloaded {
            warn!("engine already loaded or loading ({:?})", self.module);
            return;
        }

        self.advance(ModuleState::Loading);
        self.relay.emit(ChannelEvent::ModuleLoading);

        match self.loader.load() {
            Ok(engine) => {
                self.context = Some(EngineContext { engine, runs: 0 });
                self.advance(ModuleState::Ready);
                info!("compute engine loaded");
                self.relay.emit(ChannelEvent::ModuleLoaded { ready: true });
            }
            Err(e) => {
                self.advance(ModuleState::Failed);
                error!("compute engine failed to load: {e}");
                self.relay.emit(ChannelEvent::ModuleLoadError {
                    error: e.to_string(),
                });
            }
        }
    }

    fn run(&mut self, learning_rate: f64) {
        let terminal = match (self.module, self.context.as_mut()) {
            (ModuleState::Ready, Some(context)) => {
                Some(run_session(context, &mut self.relay, learning_rate))
            }
            _ => None,
        };

        // Cleared before the terminal message so the coordinator can start
        // the next run as soon as it sees it.
        self.busy.store(false, Ordering::Release);

        match terminal {
            Some(event) => {
                self.relay.emit(event);
            }
            None => {
                let reason = format!("compute engine is not ready ({:?})", self.module);
                warn!("rejecting run: {reason}");
                self.relay.emit(ChannelEvent::RunRejected { reason });
            }
        }
    }

    fn crash(&mut self, message: String) {
        self.busy.store(false, Ordering::Release);
        self.advance(ModuleState::Failed);
        error!("compute channel crashed: {message}");
        self.relay
            .emit(ChannelEvent::ChannelCrashed { error: message });
    }
}

/// Invokes the engine once and returns the run's single terminal message.
fn run_session(context: &mut EngineContext, relay: &mut Relay, learning_rate: f64) -> ChannelEvent {
    context.runs += 1;
    info!(learning_rate = learning_rate, run = context.runs; "training started");
    relay.emit(ChannelEvent::TrainingStarted { learning_rate });

    let mut tracker = StreamTracker::default();
    let result = context
        .engine
        .run(learning_rate, &mut |raw: &str| tracker.accept(raw, relay));

    tracker.finish(result)
}

/// Relays the payloads of one run and decides how the run ends.
///
/// The n-th payload that is not the completion sentinel must carry epoch n,
/// whether or not it parses.
#[derive(Debug, Default)]
struct StreamTracker {
    slots: u32,
    relayed: u32,
    parse_errors: u32,
    completion: Option<bool>,
    violation: Option<SequenceError>,
}

impl StreamTracker {
    fn accept(&mut self, raw: &str, relay: &mut Relay) {
        if self.completion.is_some() {
            warn!("payload after the completion sentinel dropped: {raw}");
            return;
        }

        let parsed = EnginePayload::parse(raw);
        if let Ok(EnginePayload::Complete { success }) = parsed {
            debug!(success = success; "completion sentinel received");
            self.completion = Some(success);
            return;
        }

        self.slots += 1;
        if self.violation.is_some() {
            return;
        }

        match parsed {
            Ok(EnginePayload::Point(point)) if point.epoch != self.slots => {
                let violation = SequenceError {
                    expected: self.slots,
                    got: point.epoch,
                };
                warn!("{violation}, dropping the rest of the stream");
                self.violation = Some(violation);
            }
            Ok(EnginePayload::Point(point)) => {
                trace!(epoch = point.epoch, loss = point.loss; "relaying point");
                self.relayed += 1;
                relay.emit(ChannelEvent::StreamPoint(point));
            }
            Ok(EnginePayload::Complete { .. }) => {}
            Err(e) => {
                self.parse_errors += 1;
                warn!("malformed payload for epoch {}: {e}", self.slots);
                relay.emit(ChannelEvent::StreamParseError {
                    error: e.to_string(),
                });
            }
        }
    }

    fn finish(self, result: Result<(), EngineError>) -> ChannelEvent {
        match (result, self.violation) {
            (Err(e), _) => {
                error!("engine failed after {} points: {e}", self.relayed);
                ChannelEvent::TrainingError {
                    error: e.to_string(),
                }
            }
            (Ok(()), Some(violation)) => {
                error!("run broke the epoch contract: {violation}");
                ChannelEvent::TrainingError {
                    error: violation.to_string(),
                }
            }
            (Ok(()), None) => {
                let success = self.completion.unwrap_or(true);
                info!(
                    points = self.relayed,
                    parse_errors = self.parse_errors,
                    success = success;
                    "training finished"
                );
                ChannelEvent::TrainingCompleted { success }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "compute channel panicked".to_string()
    }
}

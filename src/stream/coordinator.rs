use std::sync::Arc;

use actix::prelude::*;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use super::{
    aggregator::ResultSequence,
    channel::ComputeChannel,
    communication::EventSink,
    engine::EngineLoader,
    error::{ErrorKind, ErrorRecord, RequestRejected},
    protocol::{ChannelEvent, TrainingPoint},
    session::{CoordinatorState, Session, SessionStatus},
};

/* -------------------------------------------------------------------------- */
/*                               Actix messages                               */
/* -------------------------------------------------------------------------- */

/// Starts a session with the given learning rate.
#[derive(Message)]
#[rtype(result = "Result<(), RequestRejected>")]
pub struct RunTraining {
    pub learning_rate: f64,
}

/// Replaces the compute channel with a fresh one and loads it again.
#[derive(Message)]
#[rtype(result = "Result<(), RequestRejected>")]
pub struct Reload;

#[derive(Message)]
#[rtype(result = "Snapshot")]
pub struct GetSnapshot;

/// Terminates the channel and stops the coordinator.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown;

/// A channel message tagged with the generation of the channel that sent it.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ChannelNotice {
    generation: u64,
    event: ChannelEvent,
}

/* -------------------------------------------------------------------------- */
/*                              Display contract                              */
/* -------------------------------------------------------------------------- */

/// Incremental changes published to the display layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum CoordinatorUpdate {
    StateChanged {
        state: CoordinatorState,
    },
    PointAppended(TrainingPoint),
    /// A malformed payload was skipped; the session goes on.
    PayloadDropped(ErrorRecord),
    ErrorSurfaced(ErrorRecord),
    ErrorCleared,
    /// Published last, once state and error already reflect the outcome.
    SessionSettled {
        status: SessionStatus,
        #[serde(rename = "learningRate")]
        learning_rate: f64,
        points: usize,
    },
}

/// Everything the display layer needs to redraw from scratch.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub state: CoordinatorState,
    pub is_running: bool,
    pub session: Session,
    pub error: Option<ErrorRecord>,
    pub results: ResultSequence,
    pub current: Option<TrainingPoint>,
    pub dropped_payloads: usize,
    pub generation: u64,
}

/* -------------------------------------------------------------------------- */
/*                              Coordinator actor                             */
/* -------------------------------------------------------------------------- */

/// Forwards a channel's messages into the coordinator's mailbox.
struct CoordinatorSink {
    addr: Addr<Coordinator>,
    generation: u64,
}

impl EventSink for CoordinatorSink {
    fn emit(&self, event: ChannelEvent) -> bool {
        if !self.addr.connected() {
            return false;
        }

        self.addr.do_send(ChannelNotice {
            generation: self.generation,
            event,
        });
        true
    }
}

/// Owns the session state machine and the result sequence of the current run.
pub struct Coordinator {
    loader: Arc<dyn EngineLoader>,
    updates: Option<UnboundedSender<CoordinatorUpdate>>,
    channel: Option<ComputeChannel>,
    generation: u64,

    state: CoordinatorState,
    session: Session,
    results: ResultSequence,
    error: Option<ErrorRecord>,
    dropped_payloads: usize,
}

impl Coordinator {
    pub fn new<L: EngineLoader + 'static>(loader: L) -> Self {
        Self::from_shared(Arc::new(loader))
    }

    pub fn from_shared(loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            loader,
            updates: None,
            channel: None,
            generation: 0,
            state: CoordinatorState::Initializing,
            session: Session::idle(),
            results: ResultSequence::new(),
            error: None,
            dropped_payloads: 0,
        }
    }

    /// Publishes every [`CoordinatorUpdate`] on `updates`.
    pub fn with_updates(mut self, updates: UnboundedSender<CoordinatorUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    fn publish(&self, update: CoordinatorUpdate) {
        if let Some(tx) = &self.updates {
            // A closed display is not an error for the coordinator.
            let _ = tx.send(update);
        }
    }

    fn set_state(&mut self, next: CoordinatorState) {
        if self.state == next {
            return;
        }

        info!("coordinator {:?} -> {:?}", self.state, next);
        self.state = next;
        self.publish(CoordinatorUpdate::StateChanged { state: next });
    }

    /// Reports `record` to the display. Fatal kinds become the persistent
    /// error and channel-fatal kinds also retire the channel.
    fn surface(&mut self, record: ErrorRecord) {
        if !record.kind.is_fatal() {
            warn!("{record}");
            self.publish(CoordinatorUpdate::PayloadDropped(record));
            return;
        }

        error!("{record}");
        self.error = Some(record.clone());
        let channel_fatal = record.kind.is_channel_fatal();
        self.publish(CoordinatorUpdate::ErrorSurfaced(record));

        if channel_fatal {
            self.drop_channel();
            self.set_state(CoordinatorState::Failed);
        }
    }

    fn clear_error(&mut self) {
        if self.error.take().is_some() {
            self.publish(CoordinatorUpdate::ErrorCleared);
        }
    }

    fn open_channel(&mut self, ctx: &mut Context<Self>) {
        self.generation += 1;
        let sink = CoordinatorSink {
            addr: ctx.address(),
            generation: self.generation,
        };

        let loaded = ComputeChannel::spawn(Arc::clone(&self.loader), sink).and_then(|mut channel| {
            channel.load()?;
            Ok(channel)
        });

        match loaded {
            Ok(channel) => {
                debug!(generation = self.generation; "compute channel created");
                self.channel = Some(channel);
                self.set_state(CoordinatorState::Loading);
            }
            Err(e) => self.surface(ErrorRecord::new(ErrorKind::ChannelCrash, e.to_string())),
        }
    }

    fn drop_channel(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.terminate();
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            is_running: self.state == CoordinatorState::Running,
            session: self.session.clone(),
            error: self.error.clone(),
            results: self.results.clone(),
            current: self.results.latest().copied(),
            dropped_payloads: self.dropped_payloads,
            generation: self.generation,
        }
    }

    fn handle_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::ModuleLoading => {
                debug!("compute engine loading");
                if self.state == CoordinatorState::Initializing {
                    self.set_state(CoordinatorState::Loading);
                }
            }
            ChannelEvent::ModuleLoaded { ready } => {
                if self.state != CoordinatorState::Loading {
                    warn!("module loaded while {:?}, ignoring", self.state);
                    return;
                }

                if ready {
                    self.clear_error();
                    self.set_state(CoordinatorState::Ready);
                } else {
                    self.surface(ErrorRecord::new(
                        ErrorKind::ModuleLoad,
                        "compute engine loaded but is not ready",
                    ));
                }
            }
            ChannelEvent::ModuleLoadError { error } => {
                self.surface(ErrorRecord::new(ErrorKind::ModuleLoad, error));
            }
            ChannelEvent::TrainingStarted { learning_rate } => {
                if self.session.is_running() && self.session.learning_rate == learning_rate {
                    debug!(learning_rate = learning_rate; "channel confirmed session start");
                } else {
                    warn!("unexpected start confirmation for learning rate {learning_rate}");
                }
            }
            ChannelEvent::StreamPoint(point) => self.append_point(point),
            ChannelEvent::StreamParseError { error } => {
                self.dropped_payloads += 1;
                if self.state == CoordinatorState::Running {
                    self.results.skip_epoch();
                }
                self.surface(ErrorRecord::new(ErrorKind::Parse, error));
            }
            ChannelEvent::TrainingCompleted { success } => {
                let failure = (!success).then(|| {
                    ErrorRecord::new(
                        ErrorKind::Execution,
                        "compute engine reported an unsuccessful run",
                    )
                });
                self.settle_session(failure);
            }
            ChannelEvent::TrainingError { error } => {
                self.settle_session(Some(ErrorRecord::new(ErrorKind::Execution, error)));
            }
            ChannelEvent::RunRejected { reason } => {
                self.settle_session(Some(ErrorRecord::new(
                    ErrorKind::Execution,
                    format!("run rejected by compute channel: {reason}"),
                )));
            }
            ChannelEvent::ChannelCrashed { error } => {
                let interrupted = self.session.is_running();
                if interrupted {
                    self.session.settle(false);
                }
                self.surface(ErrorRecord::new(ErrorKind::ChannelCrash, error));
                if interrupted {
                    self.publish_settled();
                }
            }
        }
    }

    fn append_point(&mut self, point: TrainingPoint) {
        if self.state != CoordinatorState::Running {
            warn!("point for epoch {} outside of a session, dropping", point.epoch);
            return;
        }
        if let Err(e) = self.results.append(point) {
            warn!("{e}, dropping point");
            return;
        }

        debug!(epoch = point.epoch, loss = point.loss; "point appended");
        self.publish(CoordinatorUpdate::PointAppended(point));
    }

    /// Ends the running session; `failure` of `None` means it completed.
    fn settle_session(&mut self, failure: Option<ErrorRecord>) {
        if !self.session.is_running() {
            warn!("terminal message without a running session, ignoring");
            return;
        }

        self.session.settle(failure.is_none());

        if let Some(record) = failure {
            self.surface(record);
        }
        self.set_state(CoordinatorState::Ready);
        self.publish_settled();
    }

    fn publish_settled(&self) {
        info!(
            points = self.results.len(),
            skipped = self.results.skipped();
            "session settled as {:?}",
            self.session.status
        );
        self.publish(CoordinatorUpdate::SessionSettled {
            status: self.session.status,
            learning_rate: self.session.learning_rate,
            points: self.results.len(),
        });
    }
}

impl Actor for Coordinator {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("coordinator started");
        self.open_channel(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.drop_channel();
        info!("coordinator stopped");
    }
}

impl Handler<ChannelNotice> for Coordinator {
    type Result = ();

    fn handle(&mut self, msg: ChannelNotice, _ctx: &mut Self::Context) {
        if msg.generation != self.generation {
            debug!(
                generation = msg.generation;
                "dropping {} from a replaced channel",
                msg.event.kind()
            );
            return;
        }

        self.handle_event(msg.event);
    }
}

impl Handler<RunTraining> for Coordinator {
    type Result = Result<(), RequestRejected>;

    fn handle(&mut self, msg: RunTraining, _ctx: &mut Self::Context) -> Self::Result {
        let learning_rate = msg.learning_rate;
        if !learning_rate.is_finite() || learning_rate <= 0.0 {
            warn!("rejecting run request: invalid learning rate {learning_rate}");
            return Err(RequestRejected::InvalidLearningRate(learning_rate));
        }

        if !self.state.accepts_runs() {
            warn!("rejecting run request while {:?}", self.state);
            return Err(RequestRejected::NotReady(self.state));
        }

        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| RequestRejected::ChannelUnavailable("no compute channel".into()))?;
        if let Err(e) = channel.run(learning_rate) {
            warn!("rejecting run request: {e}");
            return Err(RequestRejected::ChannelUnavailable(e.to_string()));
        }

        self.results.clear();
        self.clear_error();
        self.session = Session::start(learning_rate);
        self.set_state(CoordinatorState::Running);
        info!(learning_rate = learning_rate; "training session requested");
        Ok(())
    }
}

impl Handler<Reload> for Coordinator {
    type Result = Result<(), RequestRejected>;

    fn handle(&mut self, _msg: Reload, ctx: &mut Self::Context) -> Self::Result {
        if self.state == CoordinatorState::Running {
            warn!("refusing to reload during a session");
            return Err(RequestRejected::SessionActive);
        }

        info!("reloading compute engine on a fresh channel");
        self.drop_channel();
        self.clear_error();
        self.set_state(CoordinatorState::Initializing);
        self.open_channel(ctx);
        Ok(())
    }
}

impl Handler<GetSnapshot> for Coordinator {
    type Result = MessageResult<GetSnapshot>;

    fn handle(&mut self, _msg: GetSnapshot, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.snapshot())
    }
}

impl Handler<Shutdown> for Coordinator {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) {
        self.drop_channel();
        ctx.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn updates_serialize_for_the_display() {
        let update = CoordinatorUpdate::SessionSettled {
            status: SessionStatus::Complete,
            learning_rate: 0.01,
            points: 200,
        };
        assert_eq!(
            serde_json::to_value(update).unwrap(),
            json!({
                "type": "SessionSettled",
                "payload": { "status": "Complete", "learningRate": 0.01, "points": 200 }
            })
        );

        let update = CoordinatorUpdate::StateChanged {
            state: CoordinatorState::Ready,
        };
        assert_eq!(
            serde_json::to_value(update).unwrap(),
            json!({ "type": "StateChanged", "payload": { "state": "Ready" } })
        );

        let update = CoordinatorUpdate::PayloadDropped(ErrorRecord::new(ErrorKind::Parse, "bad"));
        assert_eq!(
            serde_json::to_value(update).unwrap(),
            json!({
                "type": "PayloadDropped",
                "payload": { "kind": "Parse", "message": "bad" }
            })
        );
    }
}

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};

use log::trace;
use tokio::sync::mpsc::UnboundedSender;

use super::protocol::ChannelEvent;

/// Destination of the messages a compute channel emits.
///
/// Implementations must deliver in FIFO order and must not block.
pub trait EventSink: Send + 'static {
    /// Delivers `event`, returning `false` if the receiving side is gone.
    fn emit(&self, event: ChannelEvent) -> bool;
}

impl EventSink for mpsc::Sender<ChannelEvent> {
    fn emit(&self, event: ChannelEvent) -> bool {
        self.send(event).is_ok()
    }
}

impl EventSink for UnboundedSender<ChannelEvent> {
    fn emit(&self, event: ChannelEvent) -> bool {
        self.send(event).is_ok()
    }
}

/// The channel thread's side of the message path.
///
/// Every emission checks the shared termination flag first, so once the
/// handle is terminated nothing else leaves the channel.
pub(crate) struct Relay {
    sink: Box<dyn EventSink>,
    terminated: Arc<AtomicBool>,
    emitted: u64,
}

impl Relay {
    pub(crate) fn new(sink: Box<dyn EventSink>, terminated: Arc<AtomicBool>) -> Self {
        Self {
            sink,
            terminated,
            emitted: 0,
        }
    }

    /// Sends `event` unless the channel was terminated.
    ///
    /// # Returns
    /// Whether the event was handed to the sink and accepted.
    pub(crate) fn emit(&mut self, event: ChannelEvent) -> bool {
        if self.is_terminated() {
            trace!("dropping {} after termination", event.kind());
            return false;
        }

        let kind = event.kind();
        let delivered = self.sink.emit(event);
        if delivered {
            self.emitted += 1;
        } else {
            trace!("sink closed, {kind} was not delivered");
        }
        delivered
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub(crate) fn emitted(&self) -> u64 {
        self.emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_forwards_in_order() {
        let (tx, rx) = mpsc::channel();
        let mut relay = Relay::new(Box::new(tx), Arc::new(AtomicBool::new(false)));

        assert!(relay.emit(ChannelEvent::ModuleLoading));
        assert!(relay.emit(ChannelEvent::ModuleLoaded { ready: true }));

        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![
                ChannelEvent::ModuleLoading,
                ChannelEvent::ModuleLoaded { ready: true }
            ]
        );
        assert_eq!(relay.emitted(), 2);
    }

    #[test]
    fn relay_goes_silent_after_termination() {
        let (tx, rx) = mpsc::channel();
        let flag = Arc::new(AtomicBool::new(false));
        let mut relay = Relay::new(Box::new(tx), Arc::clone(&flag));

        flag.store(true, Ordering::Release);
        assert!(!relay.emit(ChannelEvent::ModuleLoading));
        assert!(rx.try_recv().is_err());
        assert_eq!(relay.emitted(), 0);
    }

    #[test]
    fn relay_reports_closed_sinks() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let mut relay = Relay::new(Box::new(tx), Arc::new(AtomicBool::new(false)));
        assert!(!relay.emit(ChannelEvent::ModuleLoading));
    }
}

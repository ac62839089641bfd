//! Out-of-band notifications: extension frames and priority changes.
//!
//! Neither kind of event is gated by demand or by the body stream state.
//! Each has a single handler slot; registering again replaces the previous
//! handler.

use inflow_core::{HttpFrame, HttpVersion, StreamPriority};
use tracing::trace;

pub type FrameHandler = Box<dyn FnMut(HttpFrame) + Send>;
pub type PriorityHandler = Box<dyn FnMut(StreamPriority) + Send>;

pub(crate) struct Notifier {
    frame: Option<FrameHandler>,
    priority: Option<PriorityHandler>,
    multiplexed: bool,
}

impl Notifier {
    pub(crate) fn new(version: HttpVersion) -> Self {
        Self {
            frame: None,
            priority: None,
            multiplexed: version.is_multiplexed(),
        }
    }

    pub(crate) fn set_frame_handler(&mut self, handler: FrameHandler) {
        self.frame = Some(handler);
    }

    pub(crate) fn set_priority_handler(&mut self, handler: PriorityHandler) {
        self.priority = Some(handler);
    }

    pub(crate) fn frame(&mut self, frame: HttpFrame) {
        match &mut self.frame {
            Some(handler) => handler(frame),
            None => trace!(kind = frame.kind, "no frame handler, frame dropped"),
        }
    }

    /// HTTP/1.x has no stream priority, so changes are ignored there.
    pub(crate) fn priority(&mut self, priority: StreamPriority) {
        if !self.multiplexed {
            trace!(?priority, "priority change on non-multiplexed stream ignored");
            return;
        }
        if let Some(handler) = &mut self.priority {
            handler(priority);
        }
    }

    /// Drop both handlers, releasing anything they captured.
    pub(crate) fn clear(&mut self) {
        self.frame = None;
        self.priority = None;
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("frame", &self.frame.is_some())
            .field("priority", &self.priority.is_some())
            .field("multiplexed", &self.multiplexed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn last_frame_handler_wins() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut notifier = Notifier::new(HttpVersion::Http2);

        let first = seen.clone();
        notifier.set_frame_handler(Box::new(move |f| first.lock().unwrap().push(("first", f.kind))));
        notifier.frame(HttpFrame::new(0xa, 0, "x"));

        let second = seen.clone();
        notifier.set_frame_handler(Box::new(move |f| second.lock().unwrap().push(("second", f.kind))));
        notifier.frame(HttpFrame::new(0xb, 0, "y"));

        assert_eq!(*seen.lock().unwrap(), vec![("first", 0xa), ("second", 0xb)]);
    }

    #[test]
    fn priority_only_on_http2() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        for version in [HttpVersion::Http11, HttpVersion::Http2] {
            let mut notifier = Notifier::new(version);
            let sink = seen.clone();
            notifier.set_priority_handler(Box::new(move |p| sink.lock().unwrap().push((version, p.weight))));
            notifier.priority(StreamPriority::new(32, 1, true));
        }

        assert_eq!(*seen.lock().unwrap(), vec![(HttpVersion::Http2, 32)]);
    }

    #[test]
    fn frames_without_handler_are_dropped() {
        let mut notifier = Notifier::new(HttpVersion::Http2);
        notifier.frame(HttpFrame::new(1, 0, "payload"));
        notifier.priority(StreamPriority::default());
    }
}

//! Typing emission for one input on one channel.

use tahweel_proto::Channel;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::TypingRegistry;

/// Turns a stream of keystrokes into throttled typing-start signals and a
/// single idle typing-stop.
///
/// Must be used inside a tokio runtime: [`handle_typing`](Self::handle_typing)
/// spawns the idle timer.
pub struct TypingSession {
    registry: TypingRegistry,
    channel: Channel,
    display_name: String,
    last_emitted_at: Option<Instant>,
    pending_stop: Option<JoinHandle<()>>,
}

impl TypingSession {
    /// Creates a session that announces `display_name` on `channel`.
    pub fn new(registry: TypingRegistry, channel: Channel, display_name: impl Into<String>) -> Self {
        Self {
            registry,
            channel,
            display_name: display_name.into(),
            last_emitted_at: None,
            pending_stop: None,
        }
    }

    /// The channel this session emits on.
    #[must_use]
    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Sends typing-start unless one went out less than `throttle` ago.
    ///
    /// Returns whether a signal was sent.
    pub fn emit_typing(&mut self) -> bool {
        let now = Instant::now();
        let throttle = self.registry.timings().throttle;
        if let Some(last) = self.last_emitted_at
            && now.saturating_duration_since(last) < throttle
        {
            return false;
        }
        self.registry.send_typing(&self.channel, &self.display_name);
        self.last_emitted_at = Some(now);
        true
    }

    /// Sends typing-stop immediately.
    pub fn emit_stop_typing(&self) {
        self.registry.send_stop_typing(&self.channel);
    }

    /// Keystroke entry point: throttled typing-start plus a fresh idle timer.
    ///
    /// If no further call arrives within `idle_stop`, typing-stop is sent
    /// once.
    pub fn handle_typing(&mut self) {
        self.emit_typing();
        self.cancel_pending_stop();

        let registry = self.registry.clone();
        let channel = self.channel.clone();
        let idle = registry.timings().idle_stop;
        self.pending_stop = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            tracing::trace!(channel = %channel, "typing idle, sending stop");
            registry.send_stop_typing(&channel);
        }));
    }

    /// Cancels the idle timer and sends typing-stop now.
    ///
    /// The throttle window is reset so the next keystroke is announced
    /// immediately.
    pub fn stop_typing(&mut self) {
        self.cancel_pending_stop();
        self.last_emitted_at = None;
        self.emit_stop_typing();
    }

    /// Whether an idle timer is armed and has not fired yet.
    #[must_use]
    pub fn has_pending_stop(&self) -> bool {
        self.pending_stop.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn cancel_pending_stop(&mut self) {
        if let Some(task) = self.pending_stop.take() {
            task.abort();
        }
    }
}

impl Drop for TypingSession {
    fn drop(&mut self) {
        self.cancel_pending_stop();
    }
}

//! Live session controller: composes capture, transport, and playback into
//! one session object with a minimal surface (`start` / `stop`).
//!
//! Capture only starts once the transport reports `Open`, so no frame can
//! ever precede the setup handshake. Teardown runs in reverse order —
//! capture, playback, transport — exactly once, whoever triggers it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::audio::{AudioDevice, CaptureEvent, CaptureSource, Playback};
use crate::config::Config;
use crate::error::SessionError;
use crate::transport::{SessionTransport, TransportCommand, TransportEvent};

/// Application-facing lifecycle callbacks, invoked from the session's
/// routing task. `on_error` fires at most once and ends the session;
/// `on_close` fires once for a clean close.
pub struct SessionCallbacks {
    pub on_open: Box<dyn Fn() + Send>,
    pub on_error: Box<dyn Fn(&SessionError) + Send>,
    pub on_close: Box<dyn Fn() + Send>,
}

impl Default for SessionCallbacks {
    fn default() -> Self {
        Self {
            on_open: Box::new(|| {}),
            on_error: Box::new(|_| {}),
            on_close: Box::new(|| {}),
        }
    }
}

/// One live voice conversation.
///
/// Dropping the handle does not end the session; call [`stop`](Self::stop).
pub struct LiveSession {
    running: Arc<AtomicBool>,
    cmd_tx: mpsc::Sender<TransportCommand>,
    capture: Arc<Mutex<Option<CaptureSource>>>,
    playback: Arc<Mutex<Option<Playback>>>,
}

impl LiveSession {
    /// Start a session: connect the transport, and once it opens, start the
    /// audio pipeline. Never blocks; every failure surfaces through
    /// `callbacks.on_error`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: Config,
        device: Arc<dyn AudioDevice>,
        system_prompt: &str,
        callbacks: SessionCallbacks,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(100);
        let (cmd_tx, cmd_rx) = mpsc::channel::<TransportCommand>(100);
        let (frame_tx, frame_rx) = mpsc::channel::<CaptureEvent>(100);

        let transport = SessionTransport::new(config.clone(), system_prompt, event_tx, cmd_rx);
        tokio::spawn(transport.run());

        let running = Arc::new(AtomicBool::new(true));
        let capture: Arc<Mutex<Option<CaptureSource>>> = Arc::new(Mutex::new(None));
        let playback: Arc<Mutex<Option<Playback>>> = Arc::new(Mutex::new(None));

        let router = Router {
            config,
            device,
            callbacks,
            running: running.clone(),
            cmd_tx: cmd_tx.clone(),
            frame_tx,
            capture: capture.clone(),
            playback: playback.clone(),
        };
        tokio::spawn(router.run(event_rx, frame_rx));

        Self {
            running,
            cmd_tx,
            capture,
            playback,
        }
    }

    /// End the session. Idempotent; safe even if the session never opened
    /// or already ended on its own.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        log::info!("Stopping session");
        teardown_pipeline(&self.capture, &self.playback, &self.cmd_tx);
    }
}

/// Routes events between the three components. Owns nothing but channel
/// ends; the capture/playback slots are shared with the `LiveSession`
/// handle so `stop` can tear them down from outside.
struct Router {
    config: Config,
    device: Arc<dyn AudioDevice>,
    callbacks: SessionCallbacks,
    running: Arc<AtomicBool>,
    cmd_tx: mpsc::Sender<TransportCommand>,
    frame_tx: mpsc::Sender<CaptureEvent>,
    capture: Arc<Mutex<Option<CaptureSource>>>,
    playback: Arc<Mutex<Option<Playback>>>,
}

impl Router {
    async fn run(
        mut self,
        mut event_rx: mpsc::Receiver<TransportEvent>,
        mut frame_rx: mpsc::Receiver<CaptureEvent>,
    ) {
        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    let Some(event) = event else { break };
                    if !self.handle_transport_event(event) {
                        break;
                    }
                }
                // The router holds its own `frame_tx` clone, so this arm
                // pends quietly until capture actually starts.
                frame = frame_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if !self.handle_capture_event(frame) {
                        break;
                    }
                }
            }
        }
    }

    /// Returns false when the session is over and the router should exit.
    fn handle_transport_event(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Open => {
                // A stop may have raced the handshake; the generation flag
                // decides whether the pipeline still gets to start.
                if !self.running.load(Ordering::SeqCst) {
                    return true;
                }
                if let Err(e) = self.open_pipeline() {
                    self.fail(&e);
                    return false;
                }
                (self.callbacks.on_open)();
            }
            TransportEvent::AudioChunk(payload) => {
                if let Some(p) = self.playback.lock().unwrap().as_ref() {
                    p.enqueue(payload);
                }
            }
            TransportEvent::Interrupted => {
                log::info!("Server interrupted the current turn");
                if let Some(p) = self.playback.lock().unwrap().as_ref() {
                    p.interrupt();
                }
            }
            TransportEvent::TurnComplete => {
                log::debug!("Server turn complete");
            }
            TransportEvent::Closed => {
                self.running.store(false, Ordering::SeqCst);
                teardown_pipeline(&self.capture, &self.playback, &self.cmd_tx);
                (self.callbacks.on_close)();
                return false;
            }
            TransportEvent::Error(e) => {
                self.fail(&e);
                return false;
            }
        }
        true
    }

    /// Returns false when the session is over and the router should exit.
    fn handle_capture_event(&mut self, event: CaptureEvent) -> bool {
        match event {
            CaptureEvent::Frame(frame) => {
                if self
                    .cmd_tx
                    .try_send(TransportCommand::SendAudio(frame))
                    .is_err()
                {
                    log::warn!("Transport not accepting audio, dropping frame");
                }
                true
            }
            CaptureEvent::Lost(reason) => {
                // A lost device ends the conversation the same way a broken
                // connection does.
                let e = SessionError::Connection(format!("capture device lost: {reason}"));
                self.fail(&e);
                false
            }
        }
    }

    /// Open playback first, then capture, so a half-open pipeline can never
    /// produce frames with nowhere to play replies.
    fn open_pipeline(&mut self) -> Result<(), SessionError> {
        let playback = Playback::start(
            self.device.as_ref(),
            self.config.playback_sample_rate,
            self.config.playback_period_size,
        )?;
        *self.playback.lock().unwrap() = Some(playback);

        let capture = CaptureSource::start(
            self.device.as_ref(),
            self.config.capture_sample_rate,
            self.config.frame_size,
            self.frame_tx.clone(),
        )?;
        *self.capture.lock().unwrap() = Some(capture);
        Ok(())
    }

    fn fail(&self, e: &SessionError) {
        log::error!("Session failed: {}", e);
        self.running.store(false, Ordering::SeqCst);
        teardown_pipeline(&self.capture, &self.playback, &self.cmd_tx);
        (self.callbacks.on_error)(e);
    }
}

/// Tear down in reverse start order: capture, playback, transport.
/// Idempotent — each slot empties on first take, and a duplicate `Close`
/// command is harmless.
fn teardown_pipeline(
    capture: &Mutex<Option<CaptureSource>>,
    playback: &Mutex<Option<Playback>>,
    cmd_tx: &mpsc::Sender<TransportCommand>,
) {
    if let Some(mut c) = capture.lock().unwrap().take() {
        c.stop();
    }
    if let Some(mut p) = playback.lock().unwrap().take() {
        p.interrupt();
        p.stop();
    }
    let _ = cmd_tx.try_send(TransportCommand::Close);
}

//! Periodic capture and OCR
//!
//! Each tick captures one still, recognizes its text and hands the blocks to
//! the shared [`OverlayScene`]. Ticks are skipped while anything could make
//! the result stale: a suspended view, an unknown viewport, a capture already
//! in flight or an open identification session.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::collaborators::{Camera, TextRecognizer};
use crate::config::CaptureConfig;
use crate::error::CaptureResult;
use crate::scene::SharedScene;
use crate::session::IdentificationMachine;
use crate::types::{CaptureFrame, RawTextBlock};

/// Read-only view of whether an identification session is open
pub trait IdleProbe: Send + Sync {
    fn is_idle(&self) -> bool;
}

impl IdleProbe for IdentificationMachine {
    fn is_idle(&self) -> bool {
        IdentificationMachine::is_idle(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ShutDown,
    Suspended,
    CameraNotReady,
    ViewportUnknown,
    CaptureInFlight,
    SessionActive,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    /// New overlay applied with this many located blocks
    Applied { blocks: usize },
    /// Capture finished after a suspend, shutdown or session start
    Discarded,
    Failed(String),
}

#[derive(Debug)]
struct LoopFlags {
    alive: AtomicBool,
    in_flight: AtomicBool,
    focused: AtomicBool,
    app_active: AtomicBool,
    generation: AtomicU64,
}

/// Clears the in-flight flag however the capture ends
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct CaptureLoop {
    camera: Arc<dyn Camera>,
    recognizer: Arc<dyn TextRecognizer>,
    scene: SharedScene,
    session: Arc<dyn IdleProbe>,
    config: CaptureConfig,
    flags: Arc<LoopFlags>,
}

impl CaptureLoop {
    pub fn new(
        camera: Arc<dyn Camera>,
        recognizer: Arc<dyn TextRecognizer>,
        scene: SharedScene,
        session: Arc<dyn IdleProbe>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            camera,
            recognizer,
            scene,
            session,
            config,
            flags: Arc::new(LoopFlags {
                alive: AtomicBool::new(true),
                in_flight: AtomicBool::new(false),
                focused: AtomicBool::new(true),
                app_active: AtomicBool::new(true),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.flags.alive.load(Ordering::SeqCst)
    }

    /// Host view gained or lost foreground focus
    pub fn set_focused(&self, focused: bool) {
        if self.flags.focused.swap(focused, Ordering::SeqCst) != focused {
            self.flags.generation.fetch_add(1, Ordering::SeqCst);
            debug!("capture focus -> {}", focused);
        }
    }

    /// Application moved to or from the background
    pub fn set_app_active(&self, active: bool) {
        if self.flags.app_active.swap(active, Ordering::SeqCst) != active {
            self.flags.generation.fetch_add(1, Ordering::SeqCst);
            debug!("capture app active -> {}", active);
        }
    }

    /// Stop the loop. Takes effect immediately for any in-flight capture.
    pub fn shutdown(&self) {
        self.flags.alive.store(false, Ordering::SeqCst);
        self.flags.generation.fetch_add(1, Ordering::SeqCst);
        info!("capture loop shut down");
    }

    fn skip_reason(&self) -> Option<SkipReason> {
        if !self.is_alive() {
            return Some(SkipReason::ShutDown);
        }
        if !self.flags.focused.load(Ordering::SeqCst) || !self.flags.app_active.load(Ordering::SeqCst) {
            return Some(SkipReason::Suspended);
        }
        if !self.camera.is_ready() {
            return Some(SkipReason::CameraNotReady);
        }
        if !self.scene.read().viewport().is_known() {
            return Some(SkipReason::ViewportUnknown);
        }
        if !self.session.is_idle() {
            return Some(SkipReason::SessionActive);
        }
        None
    }

    /// Run one capture if every gate is open
    pub async fn tick(&self) -> TickOutcome {
        if let Some(reason) = self.skip_reason() {
            return TickOutcome::Skipped(reason);
        }
        if self
            .flags
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return TickOutcome::Skipped(SkipReason::CaptureInFlight);
        }
        let _guard = InFlightGuard(&self.flags.in_flight);
        let generation = self.flags.generation.load(Ordering::SeqCst);

        let captured = self.capture_and_recognize().await;

        if !self.is_alive()
            || self.flags.generation.load(Ordering::SeqCst) != generation
            || !self.session.is_idle()
        {
            debug!("discarding stale capture");
            return TickOutcome::Discarded;
        }

        match captured {
            Ok((frame, blocks)) => {
                let count = self.scene.write().apply_capture(frame.geometry(), blocks);
                debug!("overlay updated with {} blocks", count);
                TickOutcome::Applied { blocks: count }
            }
            Err(err) => {
                warn!("capture failed: {}", err);
                TickOutcome::Failed(err.to_string())
            }
        }
    }

    async fn capture_and_recognize(&self) -> CaptureResult<(CaptureFrame, Vec<RawTextBlock>)> {
        let frame = self.camera.capture().await?;
        let blocks = self.recognizer.recognize(&frame).await?;
        Ok((frame, blocks))
    }

    /// Tick until shut down, sleeping `interval` between ticks
    pub async fn run(&self) {
        info!("capture loop started ({}ms interval)", self.config.interval.as_millis());
        while self.is_alive() {
            let outcome = self.tick().await;
            if let TickOutcome::Skipped(reason) = &outcome {
                debug!("tick skipped: {:?}", reason);
            }
            tokio::time::sleep(self.config.interval).await;
        }
        info!("capture loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;
    use crate::scene::OverlayScene;
    use crate::types::{
        BlockFrame, OrientationTag, ReportingConvention, ViewportDimensions,
    };
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct FakeCamera {
        ready: bool,
        captures: AtomicUsize,
    }

    #[async_trait]
    impl Camera for FakeCamera {
        fn is_ready(&self) -> bool {
            self.ready
        }

        async fn capture(&self) -> CaptureResult<CaptureFrame> {
            self.captures.fetch_add(1, Ordering::SeqCst);
            Ok(CaptureFrame {
                width: 1000,
                height: 2000,
                orientation: OrientationTag::Upright,
                path: None,
            })
        }
    }

    struct FakeRecognizer {
        fail: bool,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    #[async_trait]
    impl TextRecognizer for FakeRecognizer {
        async fn recognize(&self, _frame: &CaptureFrame) -> CaptureResult<Vec<RawTextBlock>> {
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }
            if self.fail {
                return Err(CaptureError::Recognition("engine crashed".to_string()));
            }
            Ok(vec![
                RawTextBlock {
                    text: "Pad Thai".to_string(),
                    frame: Some(BlockFrame {
                        left: 100.0,
                        top: 100.0,
                        width: 300.0,
                        height: 80.0,
                    }),
                },
                RawTextBlock {
                    text: "unlocated".to_string(),
                    frame: None,
                },
            ])
        }
    }

    struct FakeSession(AtomicBool);

    impl IdleProbe for FakeSession {
        fn is_idle(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct Harness {
        capture: CaptureLoop,
        camera: Arc<FakeCamera>,
        scene: SharedScene,
        session: Arc<FakeSession>,
    }

    fn harness(ready: bool, recognizer: FakeRecognizer) -> Harness {
        let camera = Arc::new(FakeCamera {
            ready,
            captures: AtomicUsize::new(0),
        });
        let scene = OverlayScene::shared(ReportingConvention::DisplayAligned);
        scene.write().set_viewport(ViewportDimensions::new(500.0, 1000.0));
        let session = Arc::new(FakeSession(AtomicBool::new(true)));
        let capture = CaptureLoop::new(
            camera.clone(),
            Arc::new(recognizer),
            scene.clone(),
            session.clone(),
            CaptureConfig::default(),
        );
        Harness {
            capture,
            camera,
            scene,
            session,
        }
    }

    fn working() -> FakeRecognizer {
        FakeRecognizer {
            fail: false,
            gate: None,
        }
    }

    #[tokio::test]
    async fn test_tick_applies_located_blocks() {
        let h = harness(true, working());
        assert_eq!(h.capture.tick().await, TickOutcome::Applied { blocks: 1 });
        assert_eq!(h.scene.read().blocks()[0].text, "Pad Thai");
    }

    #[tokio::test]
    async fn test_tick_skip_reasons() {
        let h = harness(false, working());
        assert_eq!(h.capture.tick().await, TickOutcome::Skipped(SkipReason::CameraNotReady));

        let h = harness(true, working());
        h.scene.write().set_viewport(ViewportDimensions::default());
        assert_eq!(h.capture.tick().await, TickOutcome::Skipped(SkipReason::ViewportUnknown));

        let h = harness(true, working());
        h.session.0.store(false, Ordering::SeqCst);
        assert_eq!(h.capture.tick().await, TickOutcome::Skipped(SkipReason::SessionActive));
        assert_eq!(h.camera.captures.load(Ordering::SeqCst), 0);

        let h = harness(true, working());
        h.capture.set_app_active(false);
        assert_eq!(h.capture.tick().await, TickOutcome::Skipped(SkipReason::Suspended));
        h.capture.set_app_active(true);
        assert_eq!(h.capture.tick().await, TickOutcome::Applied { blocks: 1 });
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_loop() {
        let h = harness(
            true,
            FakeRecognizer {
                fail: true,
                gate: None,
            },
        );
        assert!(matches!(h.capture.tick().await, TickOutcome::Failed(_)));
        assert!(matches!(h.capture.tick().await, TickOutcome::Failed(_)));
        assert!(h.capture.is_alive());
        assert_eq!(h.camera.captures.load(Ordering::SeqCst), 2);
    }

    async fn in_flight_harness() -> (Harness, Arc<Notify>, tokio::task::JoinHandle<TickOutcome>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let h = harness(
            true,
            FakeRecognizer {
                fail: false,
                gate: Some((entered.clone(), release.clone())),
            },
        );
        let running = {
            let capture = h.capture.clone();
            tokio::spawn(async move { capture.tick().await })
        };
        entered.notified().await;
        (h, release, running)
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let (h, release, running) = in_flight_harness().await;
        assert_eq!(h.capture.tick().await, TickOutcome::Skipped(SkipReason::CaptureInFlight));
        release.notify_one();
        assert_eq!(running.await.unwrap(), TickOutcome::Applied { blocks: 1 });
    }

    #[tokio::test]
    async fn test_shutdown_discards_in_flight_capture() {
        let (h, release, running) = in_flight_harness().await;
        h.capture.shutdown();
        release.notify_one();
        assert_eq!(running.await.unwrap(), TickOutcome::Discarded);
        assert!(h.scene.read().blocks().is_empty());
        assert_eq!(h.capture.tick().await, TickOutcome::Skipped(SkipReason::ShutDown));
    }

    #[tokio::test]
    async fn test_suspend_and_resume_discards_stale_capture() {
        let (h, release, running) = in_flight_harness().await;
        h.capture.set_focused(false);
        h.capture.set_focused(true);
        release.notify_one();
        assert_eq!(running.await.unwrap(), TickOutcome::Discarded);
        assert!(h.scene.read().blocks().is_empty());
    }

    #[tokio::test]
    async fn test_session_opened_during_capture_discards_result() {
        let (h, release, running) = in_flight_harness().await;
        h.session.0.store(false, Ordering::SeqCst);
        release.notify_one();
        assert_eq!(running.await.unwrap(), TickOutcome::Discarded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_after_shutdown() {
        let h = harness(true, working());
        let running = {
            let capture = h.capture.clone();
            tokio::spawn(async move { capture.run().await })
        };

        tokio::time::sleep(Duration::from_millis(1250)).await;
        h.capture.shutdown();
        running.await.unwrap();

        assert_eq!(h.camera.captures.load(Ordering::SeqCst), 3);
    }
}

//! Identification state machine
//!
//! One tap drives one session through
//! `idle -> identifying -> generating-image -> complete | image-error`.
//! Cancellation and teardown are plain state mutations: every continuation
//! re-checks the session id, the expected state and the liveness flag right
//! after each suspension point and before touching any state.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::collaborators::{DishIdentifier, ImageGenerator};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::poll::PollStatus;
use crate::quota::classify_identification_error;
use crate::tap::nearest_text;
use crate::types::{
    DishIdentification, DishResult, GeneratedImageRef, SessionId, TapEvent, ViewportTextBlock,
};

const NOT_READY_MESSAGE: &str = "Image not ready after polling attempts";
const POLL_TIMEOUT_MESSAGE: &str = "Request timeout";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    #[default]
    Idle,
    Identifying,
    GeneratingImage,
    Complete,
    ImageError,
}

/// Lifecycle of one user tap
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentificationSession {
    /// `None` while idle
    pub id: Option<SessionId>,
    pub state: SessionState,
    /// Nearest text to the tap, shown while identifying
    pub tapped_region_text: String,
    /// Shown while the image is being generated
    pub identified_dish_name: String,
    pub dish_result: Option<DishResult>,
    pub poll_attempt_count: u32,
    pub last_error: Option<String>,
}

/// Why a tap was ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Another session is still open
    Busy,
    /// A quota cooldown is in effect
    CoolingDown { remaining: Duration },
    /// The owning view was torn down
    Closed,
}

/// What a tap ended in
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Rejected(Rejection),
    Completed(DishResult),
    NothingIdentified,
    Failed(SessionError),
    Cancelled,
}

impl SessionOutcome {
    /// Text to surface to the user, if any
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::Rejected(Rejection::CoolingDown { remaining }) => Some(format!(
                "API quota cooldown in effect. Please retry in {}s.",
                ceil_secs(*remaining)
            )),
            Self::Rejected(_) | Self::Completed(_) | Self::Cancelled => None,
            Self::NothingIdentified => Some("No dish identified".to_string()),
            Self::Failed(SessionError::QuotaExceeded { wait }) => Some(format!(
                "API quota exceeded. Please retry in {} seconds.",
                ceil_secs(*wait)
            )),
            Self::Failed(SessionError::IdentificationFailed(_)) => {
                Some("Failed to analyze dish.".to_string())
            }
            Self::Failed(SessionError::ImageGenerationFailed(detail)) => Some(detail.clone()),
            Self::Failed(SessionError::PollTimeout { last_error, .. }) => Some(
                last_error
                    .clone()
                    .unwrap_or_else(|| NOT_READY_MESSAGE.to_string()),
            ),
            Self::Failed(SessionError::Cancelled) => None,
        }
    }
}

fn ceil_secs(duration: Duration) -> u128 {
    duration.as_millis().div_ceil(1000)
}

#[derive(Debug, Default)]
struct Shared {
    session: IdentificationSession,
    quota_cooldown_until: Option<Instant>,
}

impl Shared {
    fn is_current(&self, id: SessionId, expected: SessionState) -> bool {
        self.session.id == Some(id) && self.session.state == expected
    }

    fn reset(&mut self) {
        self.session = IdentificationSession::default();
    }

    fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        self.quota_cooldown_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }
}

/// Resets a session whose `tap` future was dropped mid-flight.
///
/// Only in-flight states are touched, so once a resting state has been
/// written the guard is inert.
struct InFlightSession {
    shared: Arc<Mutex<Shared>>,
    id: SessionId,
}

impl Drop for InFlightSession {
    fn drop(&mut self) {
        let mut shared = self.shared.lock();
        let in_flight = shared.is_current(self.id, SessionState::Identifying)
            || shared.is_current(self.id, SessionState::GeneratingImage);
        if in_flight {
            warn!("session {:?} abandoned in {:?}, resetting", self.id, shared.session.state);
            shared.reset();
        }
    }
}

/// Cloneable handle to the single identification session of a view.
///
/// Clones share state, so `cancel` and `teardown` can be called from outside
/// the task that is running `tap`.
#[derive(Clone)]
pub struct IdentificationMachine {
    identifier: Arc<dyn DishIdentifier>,
    generator: Arc<dyn ImageGenerator>,
    config: SessionConfig,
    shared: Arc<Mutex<Shared>>,
    alive: Arc<AtomicBool>,
}

impl IdentificationMachine {
    pub fn new(
        identifier: Arc<dyn DishIdentifier>,
        generator: Arc<dyn ImageGenerator>,
        config: SessionConfig,
    ) -> Self {
        Self {
            identifier,
            generator,
            config,
            shared: Arc::new(Mutex::new(Shared::default())),
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().session.state
    }

    pub fn is_idle(&self) -> bool {
        self.state() == SessionState::Idle
    }

    pub fn snapshot(&self) -> IdentificationSession {
        self.shared.lock().session.clone()
    }

    pub fn cooldown_remaining(&self) -> Option<Duration> {
        self.shared.lock().cooldown_remaining(Instant::now())
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Run one session for a tap.
    ///
    /// Returns once the session reaches a resting state or is abandoned.
    pub async fn tap(&self, tap: TapEvent, blocks: &[ViewportTextBlock]) -> SessionOutcome {
        let id = match self.begin(tap, blocks) {
            Ok(id) => id,
            Err(rejection) => {
                debug!("tap rejected: {:?}", rejection);
                return SessionOutcome::Rejected(rejection);
            }
        };
        let _in_flight = InFlightSession {
            shared: Arc::clone(&self.shared),
            id,
        };

        let budget = blocks.len().min(self.config.max_blocks);
        let identified = self.identifier.identify(tap.point, &blocks[..budget]).await;

        let identification = {
            let mut shared = self.shared.lock();
            if !self.is_alive() || !shared.is_current(id, SessionState::Identifying) {
                info!("identification returned after cancellation, dropping result");
                return SessionOutcome::Cancelled;
            }

            match identified {
                Err(err) => {
                    warn!("identification failed: {}", err);
                    let classified =
                        classify_identification_error(&err, self.config.default_quota_cooldown);
                    if let SessionError::QuotaExceeded { wait } = classified {
                        shared.quota_cooldown_until = Some(Instant::now() + wait);
                        info!("quota cooldown set for {}s", wait.as_secs());
                    }
                    shared.reset();
                    return SessionOutcome::Failed(classified);
                }
                Ok(None) => {
                    info!("no dish identified");
                    shared.reset();
                    return SessionOutcome::NothingIdentified;
                }
                Ok(Some(identification)) if identification.image_prompt.trim().is_empty() => {
                    let result = DishResult::new(identification, None);
                    shared.session.dish_result = Some(result.clone());
                    shared.session.state = SessionState::Complete;
                    info!("session {:?} complete without image", id);
                    return SessionOutcome::Completed(result);
                }
                Ok(Some(identification)) => {
                    shared.session.identified_dish_name = identification.dish_name.clone();
                    shared.session.state = SessionState::GeneratingImage;
                    info!("identified \"{}\", generating image", identification.dish_name);
                    identification
                }
            }
        };

        match self.generate_image(id, &identification.image_prompt).await {
            Ok(image) => self.complete(id, identification, image),
            Err(SessionError::Cancelled) => SessionOutcome::Cancelled,
            Err(err) => self.fail_image(id, err),
        }
    }

    fn begin(&self, tap: TapEvent, blocks: &[ViewportTextBlock]) -> Result<SessionId, Rejection> {
        if !self.is_alive() {
            return Err(Rejection::Closed);
        }

        let mut shared = self.shared.lock();
        if let Some(remaining) = shared.cooldown_remaining(Instant::now()) {
            return Err(Rejection::CoolingDown { remaining });
        }
        if shared.session.state != SessionState::Idle {
            return Err(Rejection::Busy);
        }

        let id = SessionId::new();
        shared.session = IdentificationSession {
            id: Some(id),
            state: SessionState::Identifying,
            tapped_region_text: nearest_text(tap.point, blocks),
            ..IdentificationSession::default()
        };
        info!(
            "session {:?} identifying at ({:.1}, {:.1}), struck block {:?}, {} blocks",
            id,
            tap.point.x,
            tap.point.y,
            tap.block_index,
            blocks.len()
        );
        Ok(id)
    }

    async fn generate_image(
        &self,
        id: SessionId,
        prompt: &str,
    ) -> Result<GeneratedImageRef, SessionError> {
        let started = self.generator.start_generation(prompt).await;
        self.ensure_live(id)?;
        let handle = started.map_err(|err| SessionError::ImageGenerationFailed(err.to_string()))?;

        let max_attempts = self.config.max_poll_attempts;
        let mut last_error: Option<String> = None;

        for attempt in 1..=max_attempts {
            self.ensure_live(id)?;
            self.shared.lock().session.poll_attempt_count = attempt;

            let polled =
                tokio::time::timeout(self.config.poll_request_timeout, self.generator.poll(&handle))
                    .await;
            self.ensure_live(id)?;

            match polled {
                Ok(Ok(response)) => match PollStatus::from_response(&response) {
                    PollStatus::Ready(image) => {
                        info!("image ready after {} poll attempts", attempt);
                        return Ok(image);
                    }
                    PollStatus::Failed(message) => {
                        debug!("poll attempt {} reported: {}", attempt, message);
                        last_error = Some(message);
                    }
                    PollStatus::Pending => debug!("poll attempt {} pending", attempt),
                },
                Ok(Err(err)) => {
                    warn!("poll attempt {} failed: {}", attempt, err);
                    last_error = Some(err.to_string());
                }
                Err(_) => {
                    warn!("poll attempt {} timed out", attempt);
                    last_error = Some(POLL_TIMEOUT_MESSAGE.to_string());
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.config.poll_delay).await;
            }
        }

        Err(SessionError::PollTimeout {
            attempts: max_attempts,
            last_error,
        })
    }

    fn ensure_live(&self, id: SessionId) -> Result<(), SessionError> {
        if self.is_alive()
            && self
                .shared
                .lock()
                .is_current(id, SessionState::GeneratingImage)
        {
            Ok(())
        } else {
            Err(SessionError::Cancelled)
        }
    }

    fn complete(
        &self,
        id: SessionId,
        identification: DishIdentification,
        image: GeneratedImageRef,
    ) -> SessionOutcome {
        let mut shared = self.shared.lock();
        if !self.is_alive() || !shared.is_current(id, SessionState::GeneratingImage) {
            return SessionOutcome::Cancelled;
        }
        let result = DishResult::new(identification, Some(image));
        shared.session.dish_result = Some(result.clone());
        shared.session.state = SessionState::Complete;
        info!("session {:?} complete", id);
        SessionOutcome::Completed(result)
    }

    fn fail_image(&self, id: SessionId, err: SessionError) -> SessionOutcome {
        let mut shared = self.shared.lock();
        if !self.is_alive() || !shared.is_current(id, SessionState::GeneratingImage) {
            return SessionOutcome::Cancelled;
        }
        let message = match &err {
            SessionError::ImageGenerationFailed(detail) => detail.clone(),
            SessionError::PollTimeout { last_error, .. } => last_error
                .clone()
                .unwrap_or_else(|| NOT_READY_MESSAGE.to_string()),
            other => other.to_string(),
        };
        warn!("session {:?} image error: {}", id, message);
        shared.session.last_error = Some(message);
        shared.session.state = SessionState::ImageError;
        SessionOutcome::Failed(err)
    }

    /// User cancellation from any non-idle state. Returns false when idle.
    pub fn cancel(&self) -> bool {
        let mut shared = self.shared.lock();
        if shared.session.state == SessionState::Idle {
            return false;
        }
        info!("session {:?} cancelled in {:?}", shared.session.id, shared.session.state);
        shared.reset();
        true
    }

    /// Close a finished result or image error.
    pub fn dismiss(&self) -> bool {
        let mut shared = self.shared.lock();
        match shared.session.state {
            SessionState::Complete | SessionState::ImageError => {
                shared.reset();
                true
            }
            _ => false,
        }
    }

    /// Terminal cancellation when the owning view goes away.
    ///
    /// The liveness flag flips before anything else so pending
    /// continuations observe it on their next check.
    pub fn teardown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.shared.lock().reset();
        info!("identification machine torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ServiceError, ServiceResult};
    use crate::types::{PollHandle, ViewportPoint, ViewportRect};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct FakeIdentifier {
        result: Mutex<Option<ServiceResult<Option<DishIdentification>>>>,
        calls: AtomicUsize,
        seen_blocks: AtomicUsize,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl FakeIdentifier {
        fn returning(result: ServiceResult<Option<DishIdentification>>) -> Arc<Self> {
            Arc::new(Self {
                result: Mutex::new(Some(result)),
                calls: AtomicUsize::new(0),
                seen_blocks: AtomicUsize::new(0),
                gate: None,
            })
        }

        fn gated(
            result: ServiceResult<Option<DishIdentification>>,
            entered: Arc<Notify>,
            release: Arc<Notify>,
        ) -> Arc<Self> {
            Arc::new(Self {
                result: Mutex::new(Some(result)),
                calls: AtomicUsize::new(0),
                seen_blocks: AtomicUsize::new(0),
                gate: Some((entered, release)),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DishIdentifier for FakeIdentifier {
        async fn identify(
            &self,
            _tap: ViewportPoint,
            blocks: &[ViewportTextBlock],
        ) -> ServiceResult<Option<DishIdentification>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_blocks.store(blocks.len(), Ordering::SeqCst);
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }
            self.result.lock().clone().unwrap_or(Ok(None))
        }
    }

    struct FakeGenerator {
        start: ServiceResult<PollHandle>,
        responses: Vec<Value>,
        polls: AtomicUsize,
        poll_latency: Option<Duration>,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl FakeGenerator {
        fn polling(responses: Vec<Value>) -> Arc<Self> {
            Arc::new(Self {
                start: Ok(PollHandle("https://jobs/1".to_string())),
                responses,
                polls: AtomicUsize::new(0),
                poll_latency: None,
                gate: None,
            })
        }

        fn polls(&self) -> usize {
            self.polls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ImageGenerator for FakeGenerator {
        async fn start_generation(&self, _prompt: &str) -> ServiceResult<PollHandle> {
            self.start.clone()
        }

        async fn poll(&self, _handle: &PollHandle) -> ServiceResult<Value> {
            let index = self.polls.fetch_add(1, Ordering::SeqCst);
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }
            if let Some(latency) = self.poll_latency {
                tokio::time::sleep(latency).await;
            }
            Ok(self.responses.get(index).cloned().unwrap_or_else(|| json!({})))
        }
    }

    fn dish(prompt: &str) -> DishIdentification {
        DishIdentification {
            dish_name: "Tom Yum Goong".to_string(),
            description: "Hot and sour shrimp soup".to_string(),
            image_prompt: prompt.to_string(),
            price: None,
            nutrients: None,
        }
    }

    fn blocks(count: usize) -> Vec<ViewportTextBlock> {
        (0..count)
            .map(|i| ViewportTextBlock {
                text: format!("line {i}"),
                frame: ViewportRect {
                    x: 10.0,
                    y: i as f64 * 20.0,
                    width: 100.0,
                    height: 16.0,
                },
            })
            .collect()
    }

    fn tap_at(x: f64, y: f64) -> TapEvent {
        TapEvent {
            point: ViewportPoint::new(x, y),
            block_index: None,
        }
    }

    fn machine(identifier: Arc<FakeIdentifier>, generator: Arc<FakeGenerator>) -> IdentificationMachine {
        IdentificationMachine::new(identifier, generator, SessionConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_ready_on_seventh_poll() {
        let mut responses = vec![json!({}); 6];
        responses.push(json!({"url": "https://cdn.bfl.ai/sample.jpg"}));
        let generator = FakeGenerator::polling(responses);
        let machine = machine(FakeIdentifier::returning(Ok(Some(dish("a steaming bowl")))), generator.clone());

        let started = Instant::now();
        let outcome = machine.tap(tap_at(50.0, 20.0), &blocks(3)).await;

        let SessionOutcome::Completed(result) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(
            result.generated_image_ref,
            Some(GeneratedImageRef("https://cdn.bfl.ai/sample.jpg".to_string()))
        );
        assert_eq!(generator.polls(), 7);
        assert_eq!(started.elapsed(), Duration::from_millis(2000) * 6);

        let session = machine.snapshot();
        assert_eq!(session.state, SessionState::Complete);
        assert_eq!(session.poll_attempt_count, 7);
        assert_eq!(session.dish_result, Some(result));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_budget_exhausted() {
        let generator = FakeGenerator::polling(Vec::new());
        let machine = machine(FakeIdentifier::returning(Ok(Some(dish("noodles")))), generator.clone());

        let outcome = machine.tap(tap_at(1.0, 1.0), &blocks(1)).await;

        assert_eq!(
            outcome,
            SessionOutcome::Failed(SessionError::PollTimeout {
                attempts: 10,
                last_error: None
            })
        );
        assert_eq!(outcome.user_message().unwrap(), "Image not ready after polling attempts");
        assert_eq!(generator.polls(), 10);

        let session = machine.snapshot();
        assert_eq!(session.state, SessionState::ImageError);
        assert_eq!(session.last_error.as_deref(), Some("Image not ready after polling attempts"));

        assert!(machine.dismiss());
        assert!(machine.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_poll_error_is_reported() {
        let generator = FakeGenerator::polling(vec![json!({"error": "Task not found"})]);
        let machine = machine(FakeIdentifier::returning(Ok(Some(dish("curry")))), generator);

        let outcome = machine.tap(tap_at(1.0, 1.0), &blocks(1)).await;
        assert_eq!(outcome.user_message().unwrap(), "Task not found");
        assert_eq!(machine.snapshot().last_error.as_deref(), Some("Task not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_poll_call_times_out() {
        let generator = Arc::new(FakeGenerator {
            start: Ok(PollHandle("https://jobs/slow".to_string())),
            responses: Vec::new(),
            polls: AtomicUsize::new(0),
            poll_latency: Some(Duration::from_secs(30)),
            gate: None,
        });
        let config = SessionConfig {
            max_poll_attempts: 2,
            ..SessionConfig::default()
        };
        let machine = IdentificationMachine::new(
            FakeIdentifier::returning(Ok(Some(dish("satay")))),
            generator,
            config,
        );

        let outcome = machine.tap(tap_at(1.0, 1.0), &blocks(1)).await;
        assert_eq!(
            outcome,
            SessionOutcome::Failed(SessionError::PollTimeout {
                attempts: 2,
                last_error: Some("Request timeout".to_string())
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_error_enforces_cooldown() {
        let identifier = FakeIdentifier::returning(Err(ServiceError::Http {
            status: 500,
            body: "upstream returned 429 Too Many Requests".to_string(),
        }));
        let machine = machine(identifier.clone(), FakeGenerator::polling(Vec::new()));

        let outcome = machine.tap(tap_at(1.0, 1.0), &blocks(2)).await;
        assert_eq!(
            outcome,
            SessionOutcome::Failed(SessionError::QuotaExceeded {
                wait: Duration::from_secs(30)
            })
        );
        assert!(machine.is_idle());

        tokio::time::advance(Duration::from_secs(10)).await;

        let retry = machine.tap(tap_at(1.0, 1.0), &blocks(2)).await;
        assert_eq!(
            retry,
            SessionOutcome::Rejected(Rejection::CoolingDown {
                remaining: Duration::from_secs(20)
            })
        );
        assert_eq!(
            retry.user_message().unwrap(),
            "API quota cooldown in effect. Please retry in 20s."
        );
        assert_eq!(identifier.calls(), 1);

        tokio::time::advance(Duration::from_secs(21)).await;
        assert_eq!(machine.cooldown_remaining(), None);
    }

    #[tokio::test]
    async fn test_generic_identification_failure() {
        let machine = machine(
            FakeIdentifier::returning(Err(ServiceError::Transport("connection reset".to_string()))),
            FakeGenerator::polling(Vec::new()),
        );

        let outcome = machine.tap(tap_at(1.0, 1.0), &blocks(1)).await;
        assert!(matches!(outcome, SessionOutcome::Failed(SessionError::IdentificationFailed(_))));
        assert_eq!(outcome.user_message().unwrap(), "Failed to analyze dish.");
        assert!(machine.is_idle());
        assert_eq!(machine.cooldown_remaining(), None);
    }

    #[tokio::test]
    async fn test_nothing_identified() {
        let machine = machine(FakeIdentifier::returning(Ok(None)), FakeGenerator::polling(Vec::new()));
        let outcome = machine.tap(tap_at(1.0, 1.0), &blocks(1)).await;
        assert_eq!(outcome, SessionOutcome::NothingIdentified);
        assert_eq!(outcome.user_message().unwrap(), "No dish identified");
        assert!(machine.is_idle());
    }

    #[tokio::test]
    async fn test_result_without_prompt_skips_generation() {
        let generator = FakeGenerator::polling(Vec::new());
        let machine = machine(FakeIdentifier::returning(Ok(Some(dish("  ")))), generator.clone());

        let outcome = machine.tap(tap_at(1.0, 1.0), &blocks(1)).await;
        let SessionOutcome::Completed(result) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(result.generated_image_ref, None);
        assert_eq!(generator.polls(), 0);
        assert_eq!(machine.state(), SessionState::Complete);
    }

    #[tokio::test]
    async fn test_start_generation_failure() {
        let generator = Arc::new(FakeGenerator {
            start: Err(ServiceError::InvalidResponse("No polling_url in response".to_string())),
            responses: Vec::new(),
            polls: AtomicUsize::new(0),
            poll_latency: None,
            gate: None,
        });
        let machine = machine(FakeIdentifier::returning(Ok(Some(dish("bao")))), generator);

        let outcome = machine.tap(tap_at(1.0, 1.0), &blocks(1)).await;
        assert!(matches!(outcome, SessionOutcome::Failed(SessionError::ImageGenerationFailed(_))));
        assert_eq!(machine.state(), SessionState::ImageError);
    }

    #[tokio::test]
    async fn test_block_budget_applied() {
        let identifier = FakeIdentifier::returning(Ok(None));
        let machine = machine(identifier.clone(), FakeGenerator::polling(Vec::new()));

        machine.tap(tap_at(1.0, 1.0), &blocks(60)).await;
        assert_eq!(identifier.seen_blocks.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn test_second_tap_while_busy_is_noop() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let identifier = FakeIdentifier::gated(Ok(None), entered.clone(), release.clone());
        let machine = machine(identifier.clone(), FakeGenerator::polling(Vec::new()));

        let running = {
            let machine = machine.clone();
            tokio::spawn(async move { machine.tap(tap_at(60.0, 25.0), &blocks(3)).await })
        };
        entered.notified().await;

        let before = machine.snapshot();
        assert_eq!(before.state, SessionState::Identifying);
        assert_eq!(before.tapped_region_text, "line 1");

        let second = machine.tap(tap_at(60.0, 45.0), &blocks(3)).await;
        assert_eq!(second, SessionOutcome::Rejected(Rejection::Busy));
        assert_eq!(machine.snapshot(), before);
        assert_eq!(identifier.calls(), 1);

        release.notify_one();
        assert_eq!(running.await.unwrap(), SessionOutcome::NothingIdentified);
    }

    #[tokio::test]
    async fn test_cancel_during_identification_drops_late_result() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let identifier =
            FakeIdentifier::gated(Ok(Some(dish("laksa"))), entered.clone(), release.clone());
        let generator = FakeGenerator::polling(Vec::new());
        let machine = machine(identifier, generator.clone());

        let running = {
            let machine = machine.clone();
            tokio::spawn(async move { machine.tap(tap_at(1.0, 1.0), &blocks(1)).await })
        };
        entered.notified().await;

        assert!(machine.cancel());
        assert!(machine.is_idle());
        release.notify_one();

        assert_eq!(running.await.unwrap(), SessionOutcome::Cancelled);
        assert!(machine.is_idle());
        assert_eq!(generator.polls(), 0);
        assert_eq!(machine.snapshot(), IdentificationSession::default());
    }

    #[tokio::test]
    async fn test_cancel_before_poll_response_keeps_idle() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let generator = Arc::new(FakeGenerator {
            start: Ok(PollHandle("https://jobs/2".to_string())),
            responses: vec![json!({"result": {"sample": "https://cdn/late.jpg"}})],
            polls: AtomicUsize::new(0),
            poll_latency: None,
            gate: Some((entered.clone(), release.clone())),
        });
        let machine = machine(FakeIdentifier::returning(Ok(Some(dish("pad see ew")))), generator.clone());

        let running = {
            let machine = machine.clone();
            tokio::spawn(async move { machine.tap(tap_at(1.0, 1.0), &blocks(1)).await })
        };
        entered.notified().await;
        assert_eq!(machine.state(), SessionState::GeneratingImage);

        machine.cancel();
        release.notify_one();

        assert_eq!(running.await.unwrap(), SessionOutcome::Cancelled);
        assert!(machine.is_idle());
        assert!(machine.snapshot().dish_result.is_none());
        assert_eq!(generator.polls(), 1);
    }

    #[tokio::test]
    async fn test_teardown_stops_session_and_rejects_taps() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let identifier =
            FakeIdentifier::gated(Ok(Some(dish("mango sticky rice"))), entered.clone(), release.clone());
        let machine = machine(identifier, FakeGenerator::polling(Vec::new()));

        let running = {
            let machine = machine.clone();
            tokio::spawn(async move { machine.tap(tap_at(1.0, 1.0), &blocks(1)).await })
        };
        entered.notified().await;

        machine.teardown();
        assert!(!machine.is_alive());
        release.notify_one();

        assert_eq!(running.await.unwrap(), SessionOutcome::Cancelled);
        assert!(machine.is_idle());
        assert_eq!(
            machine.tap(tap_at(1.0, 1.0), &blocks(1)).await,
            SessionOutcome::Rejected(Rejection::Closed)
        );
    }

    #[tokio::test]
    async fn test_cancel_when_idle_is_noop() {
        let machine = machine(FakeIdentifier::returning(Ok(None)), FakeGenerator::polling(Vec::new()));
        assert!(!machine.cancel());
        assert!(!machine.dismiss());
        assert!(machine.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_tap_future_returns_to_idle() {
        let generator = FakeGenerator::polling(Vec::new());
        let machine = machine(FakeIdentifier::returning(Ok(Some(dish("laksa")))), generator.clone());

        let dropped = tokio::time::timeout(
            Duration::from_millis(100),
            machine.tap(tap_at(5.0, 5.0), &blocks(2)),
        )
        .await;
        assert!(dropped.is_err());
        assert_eq!(generator.polls(), 1);
        assert!(machine.is_idle());
        assert_eq!(machine.snapshot(), IdentificationSession::default());

        let outcome = machine.tap(tap_at(5.0, 5.0), &blocks(2)).await;
        assert_eq!(
            outcome,
            SessionOutcome::Failed(SessionError::PollTimeout {
                attempts: 10,
                last_error: None
            })
        );
        assert_eq!(generator.polls(), 11);
    }

    #[tokio::test]
    async fn test_dropped_tap_during_identification_returns_to_idle() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let identifier = FakeIdentifier::gated(Ok(None), entered.clone(), release);
        let machine = machine(identifier, FakeGenerator::polling(Vec::new()));

        let worker = machine.clone();
        let running = tokio::spawn(async move { worker.tap(tap_at(1.0, 1.0), &blocks(1)).await });
        entered.notified().await;
        assert_eq!(machine.state(), SessionState::Identifying);

        running.abort();
        assert!(running.await.unwrap_err().is_cancelled());
        assert!(machine.is_idle());
    }
}

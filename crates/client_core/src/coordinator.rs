use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use shared::protocol::PartnerStatusResponse;
use tokio::{
    sync::{broadcast, watch},
    time::{self, Instant, Interval, MissedTickBehavior},
};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::ClientSettings,
    error::PairingError,
    types::{PairingEvent, PairingState},
    PairingBackend, TokenStore,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone)]
pub struct PairingOptions {
    pub poll_interval: Duration,
}

impl Default for PairingOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl From<&ClientSettings> for PairingOptions {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
        }
    }
}

/// Where a state write comes from. Refresh results carry the sequence number
/// they were dispatched with so older responses never overwrite newer ones.
#[derive(Debug, Clone, Copy)]
enum Origin {
    Refresh(u64),
    Local,
    /// Local write that also invalidates every refresh still in flight.
    Supersede,
}

/// Owns the pairing state of one signed-in session and is the only writer of
/// it. UI code reads snapshots or subscribes, and mutates through the
/// operations below.
///
/// While a generated code is outstanding and no partner is known, a poller
/// task refreshes silently every `poll_interval`. The poller stops as soon as
/// that condition goes false and is cancelled for good by [`shutdown`] or
/// when the last handle is dropped.
///
/// [`shutdown`]: PairingCoordinator::shutdown
pub struct PairingCoordinator {
    tokens: Arc<dyn TokenStore>,
    backend: Arc<dyn PairingBackend>,
    state: watch::Sender<PairingState>,
    events: broadcast::Sender<PairingEvent>,
    dispatched_refreshes: AtomicU64,
    applied_refresh: AtomicU64,
    loading_refreshes: AtomicUsize,
    poller: CancellationToken,
}

impl PairingCoordinator {
    /// Must be called from within a tokio runtime; the poller is spawned here.
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        backend: Arc<dyn PairingBackend>,
        options: PairingOptions,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(PairingState::initial());
        let (events, _) = broadcast::channel(64);
        let coordinator = Arc::new(Self {
            tokens,
            backend,
            state,
            events,
            dispatched_refreshes: AtomicU64::new(0),
            applied_refresh: AtomicU64::new(0),
            loading_refreshes: AtomicUsize::new(0),
            poller: CancellationToken::new(),
        });

        tokio::spawn(run_poller(
            Arc::downgrade(&coordinator),
            coordinator.state.subscribe(),
            options.poll_interval,
            coordinator.poller.clone(),
        ));

        coordinator
    }

    pub fn snapshot(&self) -> PairingState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PairingState> {
        self.state.subscribe()
    }

    /// State updates as a stream, starting with the current snapshot.
    pub fn state_stream(&self) -> WatchStream<PairingState> {
        WatchStream::new(self.state.subscribe())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PairingEvent> {
        self.events.subscribe()
    }

    /// Pulls the partner status from the API. Never fails: a missing token or
    /// a failed request leave the state unpaired.
    pub async fn refresh(&self, silent: bool) {
        let _loading = LoadingGuard::begin(self, !silent);
        let seq = self.dispatched_refreshes.fetch_add(1, Ordering::SeqCst) + 1;

        if self.tokens.token().await.is_none() {
            debug!(seq, "no session token, clearing pairing state");
            self.commit(Origin::Refresh(seq), |state| {
                let partner_cleared = state.clear_partner();
                state.clear_code() | partner_cleared
            });
            return;
        }

        match self.backend.partner_status().await {
            Ok(status) => self.apply_status(seq, status),
            Err(err) => {
                warn!(seq, silent, "partner status refresh failed: {err}");
                self.commit(Origin::Refresh(seq), PairingState::clear_partner);
            }
        }
    }

    pub async fn generate_code(&self) -> Result<String, PairingError> {
        if self.tokens.token().await.is_none() {
            return Err(PairingError::AuthenticationRequired);
        }

        let issued = self.backend.generate_pairing_code().await.map_err(|err| {
            warn!("pairing code generation failed: {err}");
            err
        })?;
        info!(expires_at = ?issued.expires_at, "pairing code issued");

        let code = issued.code.clone();
        self.commit(Origin::Local, |state| {
            let code_changed = replace_if_changed(&mut state.my_code, Some(issued.code.clone()));
            replace_if_changed(&mut state.code_expires_at, issued.expires_at) | code_changed
        });
        let _ = self.events.send(PairingEvent::CodeIssued {
            code: issued.code,
            expires_at: issued.expires_at,
        });
        Ok(code)
    }

    pub async fn connect_with_code(&self, code: &str) -> Result<(), PairingError> {
        let connected = self.backend.connect_with_code(code).await.map_err(|err| {
            warn!("connecting with partner code failed: {err}");
            err
        })?;
        info!(couple_id = %connected.couple_id, "connected with partner code");

        self.refresh(false).await;
        self.commit(Origin::Local, PairingState::clear_code);
        Ok(())
    }

    pub async fn unmatch(&self) -> Result<(), PairingError> {
        self.backend.unmatch().await.map_err(|err| {
            warn!("unmatch failed: {err}");
            err
        })?;
        info!("unmatched from partner");

        self.commit(Origin::Supersede, PairingState::clear_partner);
        Ok(())
    }

    /// Ends the session: stops polling for good and resets the state.
    /// Refreshes still in flight finish but their results are dropped.
    pub fn shutdown(&self) {
        self.poller.cancel();
        self.commit(Origin::Supersede, |state| {
            let reset = PairingState {
                loading: self.loading_refreshes.load(Ordering::SeqCst) > 0,
                ..PairingState::default()
            };
            replace_if_changed(state, reset)
        });
        info!("pairing session shut down");
    }

    fn apply_status(&self, seq: u64, status: PartnerStatusResponse) {
        let PartnerStatusResponse {
            couple_id,
            has_partner,
            partner,
        } = status;
        if has_partner && partner.is_none() {
            warn!(seq, "partner status reported a partner without details");
        }
        let partner = partner.filter(|_| has_partner);
        let has_partner = partner.is_some();

        self.commit(Origin::Refresh(seq), move |state| {
            let mut changed = replace_if_changed(&mut state.couple_id, couple_id);
            changed |= replace_if_changed(&mut state.has_partner, has_partner);
            changed |= replace_if_changed(&mut state.partner, partner);
            if has_partner {
                changed |= state.clear_code();
            }
            changed
        });
    }

    /// Applies a write under the watch lock and notifies subscribers only if
    /// it changed something. Partner edges are published as events.
    fn commit(&self, origin: Origin, apply: impl FnOnce(&mut PairingState) -> bool) {
        let mut transition = None;
        self.state.send_if_modified(|state| {
            match origin {
                Origin::Refresh(seq) => {
                    if seq <= self.applied_refresh.load(Ordering::SeqCst) {
                        debug!(seq, "dropping stale partner status");
                        return false;
                    }
                    self.applied_refresh.store(seq, Ordering::SeqCst);
                }
                Origin::Supersede => {
                    let latest = self.dispatched_refreshes.load(Ordering::SeqCst);
                    self.applied_refresh.fetch_max(latest, Ordering::SeqCst);
                }
                Origin::Local => {}
            }

            let was_paired = state.has_partner;
            let changed = apply(state);
            transition = match (was_paired, state.has_partner, &state.partner) {
                (false, true, Some(partner)) => Some(PairingEvent::PartnerConnected(partner.clone())),
                (true, false, _) => Some(PairingEvent::PartnerDisconnected),
                _ => None,
            };
            changed
        });

        if let Some(event) = transition {
            info!(?event, "pairing state transition");
            let _ = self.events.send(event);
        }
    }

    /// Moves the in-flight counter by `delta` and derives `loading` from it.
    /// With `delta == 0` this only settles the initial `loading = true`.
    fn settle_loading(&self, delta: isize) {
        self.state.send_if_modified(|state| {
            let in_flight = match delta.signum() {
                1 => self.loading_refreshes.fetch_add(1, Ordering::SeqCst) + 1,
                -1 => self.loading_refreshes.fetch_sub(1, Ordering::SeqCst) - 1,
                _ => self.loading_refreshes.load(Ordering::SeqCst),
            };
            replace_if_changed(&mut state.loading, in_flight > 0)
        });
    }
}

impl Drop for PairingCoordinator {
    fn drop(&mut self) {
        self.poller.cancel();
    }
}

/// Counts a non-silent refresh as loading until dropped, including when the
/// refresh future itself is dropped half way. Any finished refresh, silent or
/// not, settles the initial loading flag.
struct LoadingGuard<'a> {
    coordinator: &'a PairingCoordinator,
    counted: bool,
}

impl<'a> LoadingGuard<'a> {
    fn begin(coordinator: &'a PairingCoordinator, counted: bool) -> Self {
        if counted {
            coordinator.settle_loading(1);
        }
        Self {
            coordinator,
            counted,
        }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.coordinator
            .settle_loading(if self.counted { -1 } else { 0 });
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

async fn run_poller(
    coordinator: Weak<PairingCoordinator>,
    mut state: watch::Receiver<PairingState>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker: Option<Interval> = None;
    let mut polled_code: Option<String> = None;

    loop {
        let wanted_code = {
            let current = state.borrow_and_update();
            current
                .should_poll()
                .then(|| current.my_code.clone())
                .flatten()
        };
        if wanted_code != polled_code {
            match &wanted_code {
                Some(_) if polled_code.is_some() => {
                    debug!(?period, "pairing code replaced, polling restarted");
                    ticker = Some(poll_ticker(period));
                }
                Some(_) => {
                    debug!(?period, "waiting for partner, polling started");
                    ticker = Some(poll_ticker(period));
                }
                None => {
                    debug!("polling stopped");
                    ticker = None;
                }
            }
            polled_code = wanted_code;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = next_tick(&mut ticker) => {
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                debug!("polling partner status");
                coordinator.refresh(true).await;
            }
        }
    }

    debug!("pairing poller exited");
}

fn poll_ticker(period: Duration) -> Interval {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info, warn};

use super::backoff::Backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal. Reached through logout; nothing reconnects after this.
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("server unreachable: {0}")]
    Unreachable(String),

    #[error("connection closed: {0}")]
    Closed(String),
}

/// Opens one transport link to the server.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Link: Send + 'static;

    async fn connect(&self) -> Result<Self::Link, TransportError>;
}

/// An established link, tagged with the generation that close reports must quote.
#[derive(Debug)]
pub struct Linked<L> {
    pub generation: u64,
    pub link: L,
}

/// Handle to the reconnect driver. Clones share the same driver.
///
/// There is exactly one driver task per supervisor, so at most one connect
/// attempt is ever in flight. Close notifications only act when they name the
/// current link while it is `Connected`; late reports from an older link and
/// repeats while a retry sequence is underway are no-ops.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

struct Shared {
    state: watch::Sender<LinkState>,
    generation: AtomicU64,
    wake: Notify,
}

impl Shared {
    fn transition(&self, from: impl Fn(LinkState) -> bool, to: LinkState) -> bool {
        self.state.send_if_modified(|state| {
            if from(*state) {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn current(&self) -> LinkState {
        *self.state.borrow()
    }
}

impl Supervisor {
    /// Starts the driver, which connects right away. Established links come out of the returned receiver.
    pub fn spawn<C: Connector>(
        connector: C,
        backoff: Backoff,
    ) -> (Supervisor, mpsc::UnboundedReceiver<Linked<C::Link>>) {
        let (state, _) = watch::channel(LinkState::Disconnected);
        let shared = Arc::new(Shared {
            state,
            generation: AtomicU64::new(0),
            wake: Notify::new(),
        });
        let (links_tx, links_rx) = mpsc::unbounded_channel();

        tokio::spawn(drive(shared.clone(), connector, backoff, links_tx));
        (Supervisor { shared }, links_rx)
    }

    pub fn state(&self) -> LinkState {
        self.shared.current()
    }

    pub fn watch(&self) -> watch::Receiver<LinkState> {
        self.shared.state.subscribe()
    }

    /// Reports that the link of `generation` dropped unexpectedly. Ignored
    /// unless that link is the current one.
    pub fn connection_lost(&self, generation: u64) {
        let current = |s: LinkState| s == LinkState::Connected && self.shared.generation.load(Ordering::SeqCst) == generation;
        if self.shared.transition(current, LinkState::Disconnected) {
            info!(generation, "link lost, scheduling reconnect");
            self.shared.wake.notify_one();
        } else {
            debug!(generation, "stale close report ignored");
        }
    }

    /// Starts a new retry sequence after a previous one gave up, or cuts a pending backoff short.
    pub fn reconnect(&self) {
        if self.shared.current() == LinkState::Disconnected {
            self.shared.wake.notify_one();
        }
    }

    /// Moves to `Closed` for good and stops the driver.
    pub fn logout(&self) {
        self.shared.state.send_replace(LinkState::Closed);
        self.shared.wake.notify_one();
        info!("supervisor closed");
    }
}

enum Sequence {
    Linked,
    GaveUp,
    Closed,
}

async fn drive<C: Connector>(
    shared: Arc<Shared>,
    connector: C,
    backoff: Backoff,
    links: mpsc::UnboundedSender<Linked<C::Link>>,
) {
    let mut after_loss = false;
    let mut woken = true;

    loop {
        if !woken {
            shared.wake.notified().await;
        }
        woken = false;

        match shared.current() {
            LinkState::Closed => break,
            LinkState::Disconnected => {}
            LinkState::Connecting | LinkState::Connected => continue,
        }

        match retry(&shared, &connector, &backoff, &links, after_loss).await {
            Sequence::Linked => after_loss = true,
            Sequence::GaveUp => {
                warn!(max_attempts = backoff.max_attempts, "giving up until reconnect is requested");
                after_loss = false;
            }
            Sequence::Closed => break,
        }
    }
    debug!("supervisor driver stopped");
}

async fn retry<C: Connector>(
    shared: &Shared,
    connector: &C,
    backoff: &Backoff,
    links: &mpsc::UnboundedSender<Linked<C::Link>>,
    delay_first: bool,
) -> Sequence {
    let mut attempt = 0_u32;
    loop {
        attempt += 1;
        if attempt > 1 || delay_first {
            let step = if delay_first { attempt } else { attempt - 1 };
            let delay = backoff.delay(step);
            debug!(attempt, ?delay, "waiting before connect");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shared.wake.notified() => {}
            }
        }

        if !shared.transition(|s| s == LinkState::Disconnected, LinkState::Connecting) {
            return Sequence::Closed;
        }

        match connector.connect().await {
            Ok(link) => {
                // the new generation is visible before the state reads Connected
                let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
                if !shared.transition(|s| s == LinkState::Connecting, LinkState::Connected) {
                    // logged out while the attempt was in flight
                    return Sequence::Closed;
                }
                info!(attempt, generation, "link established");
                let _ = links.send(Linked { generation, link });
                return Sequence::Linked;
            }
            Err(err) => {
                warn!(attempt, %err, "connect failed");
                if !shared.transition(|s| s == LinkState::Connecting, LinkState::Disconnected) {
                    return Sequence::Closed;
                }
                if !backoff.allows(attempt + 1) {
                    return Sequence::GaveUp;
                }
            }
        }
    }
}

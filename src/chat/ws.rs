use std::{sync::Arc, time::Duration};

use axum::{
    debug_handler,
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, info, warn};

use crate::{auth::Identity, model::User, store::MessageStore, AppError, AppResult};

use super::{
    registry::Registry,
    relay::Relay,
    session::{ChatSession, Outbound},
    wire::{SendFrame, ServerFrame},
};

/// Socket liveness. The server pings every `ping_every`; a peer that sends
/// nothing at all (pongs included) for `idle_timeout` loses its session.
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    pub ping_every: Duration,
    pub idle_timeout: Duration,
}

impl Heartbeat {
    /// Pings three times per idle window.
    pub fn new(idle_timeout: Duration) -> Self {
        Self { ping_every: idle_timeout / 3, idle_timeout }
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[debug_handler(state = crate::AppState)]
pub async fn chat_ws(
    identity: Identity,
    State(store): State<Arc<dyn MessageStore>>,
    State(registry): State<Arc<Registry>>,
    State(relay): State<Arc<Relay>>,
    State(heartbeat): State<Heartbeat>,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let Some(user) = store.find_user(identity.user_id).await? else {
        return Err(AppError::unauthorized());
    };

    Ok(ws.on_upgrade(move |socket| run_session(socket, user, registry, relay, heartbeat)))
}

#[tracing::instrument(skip_all, fields(user_id = %user.id))]
async fn run_session(socket: WebSocket, user: User, registry: Arc<Registry>, relay: Arc<Relay>, heartbeat: Heartbeat) {
    let (session, mut outbound) = ChatSession::new(user);
    let (mut sender, receiver) = socket.split();
    registry.register(session.clone());

    let mut writer = tokio::spawn(async move {
        let mut ping = interval_at(Instant::now() + heartbeat.ping_every, heartbeat.ping_every);
        loop {
            let out = tokio::select! {
                out = outbound.recv() => match out {
                    Some(out) => out,
                    None => break,
                },
                _ = ping.tick() => {
                    if sender.send(WsMessage::Ping(Default::default())).await.is_err() {
                        break;
                    }
                    continue;
                }
            };
            let frame = match out {
                Outbound::Frame(frame) => frame,
                Outbound::Close => {
                    let _ = sender.send(WsMessage::Close(None)).await;
                    break;
                }
            };
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(err) => {
                    warn!(%err, "unserializable frame dropped");
                    continue;
                }
            };
            if sender.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut writer => {}
        _ = read_frames(receiver, &relay, &session, heartbeat.idle_timeout) => {}
    }

    registry.unregister(&session);
    session.close();
    writer.abort();
    info!(session_id = %session.id(), "session ended");
}

/// Handles client frames until the peer closes, the stream fails, or nothing
/// arrives for `idle`.
async fn read_frames<S>(mut receiver: S, relay: &Relay, session: &ChatSession, idle: Duration)
where
    S: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
{
    loop {
        let msg = match timeout(idle, receiver.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(err))) => {
                debug!(%err, "socket read failed");
                return;
            }
            Ok(None) => return,
            Err(_) => {
                info!(?idle, "peer went quiet");
                return;
            }
        };
        match msg {
            WsMessage::Text(text) => handle_frame(relay, session, text.as_str()).await,
            WsMessage::Close(_) => return,
            _ => {}
        }
    }
}

async fn handle_frame(relay: &Relay, session: &ChatSession, raw: &str) {
    let frame: SendFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(%err, "ignoring malformed frame");
            return;
        }
    };

    let client_id = frame.client_id.clone();
    if let Err(err) = relay.send(session.user_id(), frame).await {
        warn!(%err, "send rejected");
        let _ = session.push(ServerFrame::Error { error: err.to_string(), client_id });
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;
    use crate::{
        db::tests::{add_user, memory_store},
        model::{Message, UserId},
    };

    #[tokio::test]
    async fn malformed_frames_are_ignored() {
        let store = memory_store().await;
        let ana = add_user(&store, "ana").await;
        let registry = Arc::new(Registry::new());
        let relay = Relay::new(Arc::new(store), registry.clone());
        let (session, mut rx) = ChatSession::new(ana.clone());
        registry.register(session.clone());
        while rx.try_recv().is_ok() {}

        handle_frame(&relay, &session, "not json").await;
        handle_frame(&relay, &session, r#"{"recipient":"42","text":"hi"}"#).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejected_send_reports_back_with_client_id() {
        let store = memory_store().await;
        let ana = add_user(&store, "ana").await;
        let registry = Arc::new(Registry::new());
        let relay = Relay::new(Arc::new(store), registry.clone());
        let (session, mut rx) = ChatSession::new(ana.clone());
        registry.register(session.clone());
        while rx.try_recv().is_ok() {}

        let raw = serde_json::json!({
            "recipient": UserId::new(),
            "text": "anyone?",
            "client_id": "c9",
        })
        .to_string();
        handle_frame(&relay, &session, &raw).await;

        let Ok(Outbound::Frame(ServerFrame::Error { client_id, .. })) = rx.try_recv() else {
            panic!("expected error frame");
        };
        assert_eq!(client_id.as_deref(), Some("c9"));
    }

    fn assert_elapsed(started: Instant, expected: Duration) {
        let elapsed = started.elapsed();
        assert!(elapsed >= expected && elapsed < expected + Duration::from_secs(1), "{elapsed:?}");
    }

    #[tokio::test]
    async fn silent_reader_gives_up_after_idle_timeout() {
        let store = memory_store().await;
        let ana = add_user(&store, "ana").await;
        let relay = Relay::new(Arc::new(store), Arc::new(Registry::new()));
        let (session, _rx) = ChatSession::new(ana);
        tokio::time::pause();

        let started = Instant::now();
        let silent = stream::pending::<Result<WsMessage, axum::Error>>();
        read_frames(silent, &relay, &session, Duration::from_secs(60)).await;
        assert_elapsed(started, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn pongs_keep_the_reader_alive() {
        let store = memory_store().await;
        let ana = add_user(&store, "ana").await;
        let relay = Relay::new(Arc::new(store), Arc::new(Registry::new()));
        let (session, _rx) = ChatSession::new(ana);
        tokio::time::pause();

        // two pongs 40s apart, then silence
        let pongs = Box::pin(stream::unfold(0, |sent| async move {
            if sent == 2 {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(Duration::from_secs(40)).await;
            Some((Ok::<_, axum::Error>(WsMessage::Pong(Default::default())), sent + 1))
        }));

        let started = Instant::now();
        read_frames(pongs, &relay, &session, Duration::from_secs(60)).await;
        assert_elapsed(started, Duration::from_secs(140));
    }

    #[tokio::test]
    async fn accepted_frame_is_echoed_to_sender() {
        let store = memory_store().await;
        let ana = add_user(&store, "ana").await;
        let bo = add_user(&store, "bo").await;
        let registry = Arc::new(Registry::new());
        let relay = Relay::new(Arc::new(store), registry.clone());
        let (session, mut rx) = ChatSession::new(ana.clone());
        registry.register(session.clone());
        while rx.try_recv().is_ok() {}

        let raw = serde_json::json!({ "recipient": bo.id, "text": "hi" }).to_string();
        handle_frame(&relay, &session, &raw).await;

        let Ok(Outbound::Frame(ServerFrame::Message(Message { sender, recipient, text, .. }))) = rx.try_recv() else {
            panic!("expected confirmed message");
        };
        assert_eq!((sender, recipient, text.as_str()), (ana.id, bo.id, "hi"));
    }

    mod socket {
        use std::net::SocketAddr;

        use axum::{extract::Request, middleware::{self, Next}};
        use serde_json::json;
        use tokio::net::TcpStream;
        use tokio_tungstenite::{
            connect_async,
            tungstenite::{client::IntoClientRequest, Message as ClientMessage},
            MaybeTlsStream, WebSocketStream,
        };
        use tower_sessions::{MemoryStore, Session, SessionManagerLayer};

        use super::*;
        use crate::{session::USER_ID, AppState};

        type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

        const TEST_USER: &str = "x-test-user";

        /// Stands in for the external login by copying a header into the cookie session.
        async fn sign_in_from_header(session: Session, req: Request, next: Next) -> Response {
            if let Some(id) = req.headers().get(TEST_USER).and_then(|v| v.to_str().ok()) {
                session.insert(USER_ID, id.to_owned()).await.unwrap();
            }
            next.run(req).await
        }

        async fn serve(state: AppState) -> SocketAddr {
            let app = crate::routes()
                .layer(middleware::from_fn(sign_in_from_header))
                .layer(SessionManagerLayer::new(MemoryStore::default()))
                .with_state(state);
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
            addr
        }

        async fn connect(addr: SocketAddr, user: UserId) -> Client {
            let mut req = format!("ws://{addr}/ws").into_client_request().unwrap();
            req.headers_mut().insert(TEST_USER, user.to_string().parse().unwrap());
            let (client, _) = connect_async(req).await.unwrap();
            client
        }

        /// Next server frame, or `None` once the server closed the socket.
        async fn next_frame(client: &mut Client) -> Option<ServerFrame> {
            let read = async {
                while let Some(msg) = client.next().await {
                    match msg.ok()? {
                        ClientMessage::Text(text) => return serde_json::from_str(text.as_str()).ok(),
                        ClientMessage::Close(_) => return None,
                        _ => {}
                    }
                }
                None
            };
            tokio::time::timeout(Duration::from_secs(5), read).await.expect("server went silent")
        }

        fn online(frame: Option<ServerFrame>) -> Vec<UserId> {
            match frame {
                Some(ServerFrame::Online { online }) => online.into_iter().map(|u| u.user_id).collect(),
                other => panic!("expected presence, got {other:?}"),
            }
        }

        async fn wait_until(what: &str, cond: impl Fn() -> bool) {
            let poll = async {
                while !cond() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            };
            tokio::time::timeout(Duration::from_secs(5), poll)
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
        }

        #[tokio::test]
        async fn new_socket_supersedes_the_old_one_and_exit_frees_the_slot() {
            let store = memory_store().await;
            let ana = add_user(&store, "ana").await;
            let state = AppState::new(Arc::new(store));
            let registry = state.registry.clone();
            let addr = serve(state).await;

            let mut first = connect(addr, ana.id).await;
            assert_eq!(online(next_frame(&mut first).await), vec![ana.id]);

            let mut second = connect(addr, ana.id).await;
            assert_eq!(online(next_frame(&mut second).await), vec![ana.id]);
            assert_eq!(next_frame(&mut first).await, None);
            drop(first);

            // give the old session time to run its (stale) unregister
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(registry.len(), 1);

            let raw = json!({ "recipient": ana.id, "text": "still here" }).to_string();
            second.send(ClientMessage::Text(raw.into())).await.unwrap();
            let Some(ServerFrame::Message(msg)) = next_frame(&mut second).await else {
                panic!("expected the message on the live socket");
            };
            assert_eq!(msg.text, "still here");

            second.close(None).await.unwrap();
            wait_until("registry to empty", || registry.is_empty()).await;
        }

        #[tokio::test]
        async fn peers_see_a_user_leave_when_the_socket_closes() {
            let store = memory_store().await;
            let ana = add_user(&store, "ana").await;
            let bo = add_user(&store, "bo").await;
            let addr = serve(AppState::new(Arc::new(store))).await;

            let mut watcher = connect(addr, bo.id).await;
            assert_eq!(online(next_frame(&mut watcher).await), vec![bo.id]);

            let mut leaving = connect(addr, ana.id).await;
            assert_eq!(online(next_frame(&mut watcher).await).len(), 2);

            leaving.close(None).await.unwrap();
            assert_eq!(online(next_frame(&mut watcher).await), vec![bo.id]);
        }

        #[tokio::test]
        async fn unresponsive_socket_is_dropped_after_idle_timeout() {
            let store = memory_store().await;
            let ana = add_user(&store, "ana").await;
            let bo = add_user(&store, "bo").await;
            let state = AppState::new(Arc::new(store)).with_heartbeat(Heartbeat::new(Duration::from_millis(300)));
            let registry = state.registry.clone();
            let addr = serve(state).await;

            let mut watcher = connect(addr, bo.id).await;
            assert_eq!(online(next_frame(&mut watcher).await), vec![bo.id]);

            // never read, so its pings go unanswered
            let _silent = connect(addr, ana.id).await;
            assert_eq!(online(next_frame(&mut watcher).await).len(), 2);

            assert_eq!(online(next_frame(&mut watcher).await), vec![bo.id]);
            assert!(registry.lookup(ana.id).is_none());
            assert!(registry.lookup(bo.id).is_some());
        }
    }
}

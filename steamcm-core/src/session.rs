//! The session orchestrator: server selection, handshake, read loop, and the
//! public send/wait/on surface service adapters build on.

use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use steamcm_net::{handshake, FramedTransport, TransportReader, TransportWriter};
use steamcm_proto::header::ProtoHeader;
use steamcm_proto::{message_id, multi, packet, Packet};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::Error;
use crate::event_bus::{EventBus, Predicate, SubscriptionId};
use crate::registry::{Registry, ServerEndpoint};
use crate::retry::{RetryContext, RetryPolicy};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Disconnected,
    Connecting,
    Running,
}

struct Inner {
    config: Config,
    registry: Mutex<Registry>,
    events: EventBus,
    state: Mutex<State>,
    writer: Mutex<Option<TransportWriter>>,
    read_loop: Mutex<Option<JoinHandle<()>>>,
    client_sessionid: i32,
    steam_id: Mutex<u64>,
    machine_id: [u8; 16],
    #[cfg(test)]
    last_cipher: Mutex<Option<steamcm_net::SessionCipher>>,
}

/// A single CM connection: one TCP socket, one handshake, one read loop.
/// Cheap to clone — internally `Arc`-wrapped.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Build a disconnected session. Draws a random positive client session
    /// id and a random 16-byte machine id, per the contracts service
    /// adapters rely on.
    pub fn new(config: Config) -> Self {
        let mut sessionid_bytes = [0u8; 4];
        getrandom::getrandom(&mut sessionid_bytes).expect("OS RNG must be available");
        let client_sessionid = (i32::from_ne_bytes(sessionid_bytes) & i32::MAX).max(1);

        let mut machine_id = [0u8; 16];
        getrandom::getrandom(&mut machine_id).expect("OS RNG must be available");

        Self {
            inner: Arc::new(Inner {
                config,
                registry: Mutex::new(Registry::new()),
                events: EventBus::new(),
                state: Mutex::new(State::Disconnected),
                writer: Mutex::new(None),
                read_loop: Mutex::new(None),
                client_sessionid,
                steam_id: Mutex::new(0),
                machine_id,
                #[cfg(test)]
                last_cipher: Mutex::new(None),
            }),
        }
    }

    /// Seed the registry with known endpoints, skipping the directory
    /// fetch `connect` would otherwise perform. Useful when a caller
    /// already has a server list (or in tests).
    pub async fn set_endpoints(&self, endpoints: Vec<ServerEndpoint>) {
        self.inner.registry.lock().await.replace_endpoints(endpoints);
    }

    /// The cached fastest endpoint, if [`Session::connect`] has ranked one.
    pub async fn fastest_endpoint(&self) -> Option<ServerEndpoint> {
        self.inner.registry.lock().await.fastest().cloned()
    }

    /// Select a server, open TCP, drive the handshake, and start the read
    /// loop. Retries according to `retry_policy` between failed attempts;
    /// pass [`crate::retry::NoRetries`] for a single attempt.
    pub async fn connect(&self, retry_policy: &dyn RetryPolicy, use_fastest: bool) -> Result<(), Error> {
        *self.inner.state.lock().await = State::Connecting;

        let mut fail_count = 0u32;
        let mut slept_so_far = Duration::ZERO;
        loop {
            match self.connect_once(use_fastest).await {
                Ok(()) => {
                    // The read loop just spawned may already have observed a dead
                    // socket and set `Disconnected` by the time we get here; never
                    // clobber that back to `Running`.
                    let mut state = self.inner.state.lock().await;
                    if *state != State::Disconnected {
                        *state = State::Running;
                    }
                    return Ok(());
                }
                Err(error) => {
                    fail_count += 1;
                    let ctx = RetryContext {
                        fail_count: NonZeroU32::new(fail_count).expect("incremented above zero"),
                        slept_so_far,
                        error,
                    };
                    match retry_policy.should_retry(&ctx) {
                        ControlFlow::Continue(delay) => {
                            slept_so_far += delay;
                            tokio::time::sleep(delay).await;
                        }
                        ControlFlow::Break(()) => {
                            *self.inner.state.lock().await = State::Disconnected;
                            return Err(ctx.error);
                        }
                    }
                }
            }
        }
    }

    async fn connect_once(&self, use_fastest: bool) -> Result<(), Error> {
        let endpoint = self.select_endpoint(use_fastest).await?;
        let timeout = self.inner.config.connection_timeout;

        let mut transport = tokio::time::timeout(timeout, FramedTransport::connect(&endpoint.addr()))
            .await
            .map_err(|_| Error::ConnectFailed)?
            .map_err(Error::from)?;

        let _handshake = handshake::run(&mut transport, timeout).await?;
        #[cfg(test)]
        {
            *self.inner.last_cipher.lock().await = Some(steamcm_net::SessionCipher {
                aes_key: _handshake.aes_key,
                hmac_secret: _handshake.hmac_secret,
            });
        }

        let (reader, writer) = transport.into_split();
        *self.inner.writer.lock().await = Some(writer);

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { Self::read_loop(inner, reader).await });
        *self.inner.read_loop.lock().await = Some(handle);

        Ok(())
    }

    async fn select_endpoint(&self, use_fastest: bool) -> Result<ServerEndpoint, Error> {
        let mut registry = self.inner.registry.lock().await;
        let timeout = self.inner.config.connection_timeout;

        if registry.endpoints().is_empty() {
            registry.fetch(&self.inner.config.cm_list_url).await;
        }

        if use_fastest || registry.fastest().is_some() {
            if registry.fastest().is_none() {
                registry.find_fastest(timeout, self.inner.config.max_connections).await;
            }
            if let Some(endpoint) = registry.fastest() {
                return Ok(endpoint.clone());
            }
        }

        if let Some(endpoint) = registry.first_reachable(timeout).await {
            return Ok(endpoint);
        }

        registry.fetch(&self.inner.config.cm_list_url).await;
        registry
            .first_reachable(timeout)
            .await
            .ok_or(Error::ConnectFailed)
    }

    async fn read_loop(inner: Arc<Inner>, mut reader: TransportReader) {
        loop {
            match reader.recv().await {
                Ok(frame) => match packet::parse(&frame) {
                    Ok(parsed) => Self::dispatch(&inner, parsed).await,
                    Err(e) => tracing::warn!(?e, "dropping frame that failed to parse"),
                },
                Err(e) => {
                    tracing::warn!(error = %e, "read loop exiting");
                    break;
                }
            }
        }

        *inner.state.lock().await = State::Disconnected;
        inner.writer.lock().await.take();
        inner.read_loop.lock().await.take();
    }

    async fn dispatch(inner: &Arc<Inner>, incoming: Packet) {
        if incoming.message_id == message_id::MULTI {
            match multi::unpack_multi(&incoming) {
                Ok(packets) => {
                    for sub_packet in packets {
                        inner.events.emit(sub_packet.message_id, &sub_packet).await;
                    }
                }
                Err(e) => tracing::warn!(?e, "failed to unpack Multi"),
            }
        } else {
            inner.events.emit(incoming.message_id, &incoming).await;
        }
    }

    /// Encode and send a protobuf-headed message. Fails with
    /// [`Error::NotConnected`] unless the handshake has completed.
    pub async fn send_protobuf(&self, message_id: u32, body: &[u8], steam_id: Option<u64>) -> Result<(), Error> {
        let mut writer_guard = self.inner.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(Error::NotConnected)?;

        let steam_id = match steam_id {
            Some(id) => id,
            None => *self.inner.steam_id.lock().await,
        };
        let header = ProtoHeader::new(steam_id, self.inner.client_sessionid);
        let frame = packet::encode_protobuf(message_id, &header, body);
        writer.send(&frame).await.map_err(crate::error::from_write_failure)
    }

    /// Cancel the read loop and close the socket. Idempotent.
    pub async fn disconnect(&self) {
        let mut state = self.inner.state.lock().await;
        if *state == State::Disconnected {
            return;
        }
        *state = State::Disconnected;
        drop(state);

        if let Some(handle) = self.inner.read_loop.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.inner.writer.lock().await.take();
    }

    /// `true` iff the read loop is live and the socket is open.
    pub async fn connected(&self) -> bool {
        *self.inner.state.lock().await == State::Running
    }

    /// The remote Steam id, `0` until logon completes.
    pub async fn steam_id(&self) -> u64 {
        *self.inner.steam_id.lock().await
    }

    /// Record the Steam id once logon succeeds.
    pub async fn set_steam_id(&self, steam_id: u64) {
        *self.inner.steam_id.lock().await = steam_id;
    }

    /// The random positive client session id generated at construction.
    pub fn session_id(&self) -> i32 {
        self.inner.client_sessionid
    }

    /// The random 16-byte machine id generated at construction.
    pub fn machine_id(&self) -> [u8; 16] {
        self.inner.machine_id
    }

    /// Register a callback invoked for every packet emitted on `topic`.
    pub async fn on(&self, topic: u32, callback: impl Fn(&Packet) + Send + Sync + 'static) -> SubscriptionId {
        self.inner.events.on(topic, callback).await
    }

    /// Best-effort removal of a subscriber registered with [`Session::on`].
    pub async fn off(&self, topic: u32, id: SubscriptionId) {
        self.inner.events.off(topic, id).await
    }

    /// Await the first packet on `topic` matching `predicate`, or time out.
    pub async fn wait_for(&self, topic: u32, timeout: Duration, predicate: Option<Predicate>) -> Result<Packet, Error> {
        self.inner.events.wait_for(topic, timeout, predicate).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::NoRetries;
    use steamcm_proto::header::LegacyHeader;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn write_vt01_frame(stream: &mut TcpStream, payload: &[u8]) {
        stream.write_all(&(payload.len() as u32).to_le_bytes()).await.unwrap();
        stream.write_all(b"VT01").await.unwrap();
        stream.write_all(payload).await.unwrap();
    }

    async fn read_vt01_frame(stream: &mut TcpStream) -> Vec<u8> {
        let mut len_bytes = [0u8; 4];
        stream.read_exact(&mut len_bytes).await.unwrap();
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut magic = [0u8; 4];
        stream.read_exact(&mut magic).await.unwrap();
        assert_eq!(&magic, b"VT01");
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.unwrap();
        payload
    }

    async fn mock_handshake_ok(stream: &mut TcpStream) {
        let mut request_body = Vec::new();
        request_body.extend(1u32.to_le_bytes());
        request_body.extend(1u32.to_le_bytes());
        request_body.extend([0u8; 16]);
        let request = packet::encode_legacy(LegacyHeader::new(message_id::CHANNEL_ENCRYPT_REQUEST), &request_body);
        write_vt01_frame(stream, &request).await;

        let _response = read_vt01_frame(stream).await;

        let result = packet::encode_legacy(LegacyHeader::new(message_id::CHANNEL_ENCRYPT_RESULT), &1u32.to_le_bytes());
        write_vt01_frame(stream, &result).await;
    }

    fn varint(mut value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if value == 0 {
                break;
            }
        }
        out
    }

    fn build_multi_body(size_unzipped: u32, message_body: Vec<u8>) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(0x08);
        out.extend(varint(size_unzipped as u64));
        out.push(0x12);
        out.extend(varint(message_body.len() as u64));
        out.extend(message_body);
        out
    }

    #[tokio::test]
    async fn read_loop_unwraps_multi_into_ordered_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (cipher_tx, cipher_rx) = tokio::sync::oneshot::channel::<steamcm_net::SessionCipher>();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            mock_handshake_ok(&mut stream).await;

            let cipher = cipher_rx.await.unwrap();

            let heartbeat = packet::encode_legacy(LegacyHeader::new(message_id::CLIENT_HEART_BEAT), b"hb");
            let unknown = packet::encode_legacy(LegacyHeader::new(9999), b"??");
            let mut concatenated = Vec::new();
            for frame in [&heartbeat, &unknown] {
                concatenated.extend((frame.len() as u32).to_le_bytes());
                concatenated.extend(frame.as_slice());
            }
            let body = build_multi_body(0, concatenated);
            let plaintext = packet::encode_protobuf(message_id::MULTI, &ProtoHeader::new(0, 0), &body);
            let ciphertext =
                steamcm_crypto::aes::aes_encrypt_hmac(&plaintext, &cipher.aes_key, &cipher.hmac_secret);
            write_vt01_frame(&mut stream, &ciphertext).await;
        });

        let session = Session::new(Config::default());
        session
            .set_endpoints(vec![ServerEndpoint { host: "127.0.0.1".to_string(), port: addr.port() }])
            .await;

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let order_heartbeat = order.clone();
        session
            .on(message_id::CLIENT_HEART_BEAT, move |_| order_heartbeat.lock().unwrap().push(message_id::CLIENT_HEART_BEAT))
            .await;
        let order_unknown = order.clone();
        session.on(9999, move |_| order_unknown.lock().unwrap().push(9999)).await;

        session.connect(&NoRetries, false).await.unwrap();

        let cipher = self_cipher(&session).await.expect("handshake installed a cipher");
        let _ = cipher_tx.send(cipher);

        for _ in 0..100 {
            if order.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(*order.lock().unwrap(), vec![message_id::CLIENT_HEART_BEAT, 9999]);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn read_loop_exits_on_integrity_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (cipher_tx, cipher_rx) = tokio::sync::oneshot::channel::<steamcm_net::SessionCipher>();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            mock_handshake_ok(&mut stream).await;

            let cipher = cipher_rx.await.unwrap();
            let heartbeat = packet::encode_legacy(LegacyHeader::new(message_id::CLIENT_HEART_BEAT), b"hb");
            let mut ciphertext =
                steamcm_crypto::aes::aes_encrypt_hmac(&heartbeat, &cipher.aes_key, &cipher.hmac_secret);
            ciphertext[20] ^= 0xff;
            write_vt01_frame(&mut stream, &ciphertext).await;
        });

        let session = Session::new(Config::default());
        session
            .set_endpoints(vec![ServerEndpoint { host: "127.0.0.1".to_string(), port: addr.port() }])
            .await;
        session.connect(&NoRetries, false).await.unwrap();

        let cipher = self_cipher(&session).await.expect("handshake installed a cipher");
        let _ = cipher_tx.send(cipher);

        for _ in 0..50 {
            if !session.connected().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!session.connected().await);

        server.await.unwrap();
    }

    async fn self_cipher(session: &Session) -> Option<steamcm_net::SessionCipher> {
        session.inner.last_cipher.lock().await.clone()
    }

    #[tokio::test]
    async fn send_protobuf_fails_when_not_connected() {
        let session = Session::new(Config::default());
        let result = session.send_protobuf(1, &[], None).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn disconnect_on_a_fresh_session_is_a_no_op() {
        let session = Session::new(Config::default());
        session.disconnect().await;
        assert!(!session.connected().await);
    }

    #[tokio::test]
    async fn connect_without_a_reachable_server_fails() {
        let mut config = Config::default();
        config.cm_list_url = "http://127.0.0.1:1/nonexistent".to_string();
        config.connection_timeout = Duration::from_millis(50);
        let session = Session::new(config);

        let result = session.connect(&NoRetries, false).await;
        assert!(matches!(result, Err(Error::ConnectFailed)));
        assert!(!session.connected().await);
    }

    #[test]
    fn session_id_and_machine_id_are_stable_across_clones() {
        let session = Session::new(Config::default());
        let cloned = session.clone();
        assert_eq!(session.session_id(), cloned.session_id());
        assert_eq!(session.machine_id(), cloned.machine_id());
    }
}

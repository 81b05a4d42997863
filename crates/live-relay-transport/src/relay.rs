//! Session bridge between one browser socket and one live session.
//!
//! A relay runs two pumps as separate tasks:
//! - upstream -> client: receives server messages, answers tool calls on the
//!   live session, forwards everything else to the browser
//! - client -> upstream: decodes browser frames into realtime input
//!
//! The pumps share the live session handle and a cancellation token. Whichever
//! pump stops first cancels the token. That interrupts every pending read and
//! write of the other pump and closes the live session right away. The client
//! socket is closed by the upstream pump on exit, whatever the outcome.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use live_relay_core::{
    AcknowledgeHandler, Classified, CodecError, ForwardPolicy, LiveConnectConfig, LiveSession,
    SessionError, SessionFactory, ToolHandler,
    protocol::ServerContent,
    translate::{build_tool_responses, classify, decode_client_frame, encode_server_message},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Bound for closing the client socket when no write timeout is set.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Relay error. Always scoped to a single relay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Failed to open live session: {0}")]
    Connect(#[source] SessionError),
    #[error("Live session error: {0}")]
    Upstream(#[source] SessionError),
    #[error("Malformed client frame: {0}")]
    Decode(#[source] CodecError),
    #[error("Failed to encode server message: {0}")]
    Encode(#[source] CodecError),
    #[error("Client read failed: {0}")]
    ClientRead(String),
    #[error("Client write failed: {0}")]
    ClientWrite(String),
    #[error("Timed out writing to {0}")]
    WriteTimeout(&'static str),
    #[error("Pump task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Why a relay ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// The browser closed its socket.
    ClientClosed,
    /// The live session was closed by the server.
    UpstreamClosed,
    /// The relay was shut down from outside.
    Cancelled,
}

/// Per-relay behaviour.
#[derive(Clone)]
pub struct RelayOptions {
    /// Answers tool calls; acknowledges everything by default.
    pub tool_handler: Arc<dyn ToolHandler>,
    pub forward_policy: ForwardPolicy,
    /// Upper bound for a single function call.
    pub tool_timeout: Option<Duration>,
    /// Upper bound for a single write to either side.
    pub write_timeout: Option<Duration>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            tool_handler: Arc::new(AcknowledgeHandler),
            forward_policy: ForwardPolicy::default(),
            tool_timeout: None,
            write_timeout: None,
        }
    }
}

impl fmt::Debug for RelayOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayOptions")
            .field("forward_policy", &self.forward_policy)
            .field("tool_timeout", &self.tool_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

/// Runs relays. Cheap to clone; one instance serves every connection.
#[derive(Clone)]
pub struct Relay {
    factory: Arc<dyn SessionFactory>,
    model: Arc<str>,
    config: Arc<LiveConnectConfig>,
    options: RelayOptions,
    shutdown: CancellationToken,
}

impl Relay {
    /// Create a relay opening `model` sessions through `factory`.
    #[must_use]
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        model: impl Into<String>,
        config: LiveConnectConfig,
    ) -> Self {
        Self {
            factory,
            model: model.into().into(),
            config: Arc::new(config),
            options: RelayOptions::default(),
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: RelayOptions) -> Self {
        let missing = unhandled_functions(&self.config, options.tool_handler.as_ref());
        if !missing.is_empty() {
            tracing::warn!(?missing, "Declared functions have no tool handler");
        }
        self.options = options;
        self
    }

    /// Use `token` to stop every running relay.
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Token that stops every relay started from this instance.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Relay an upgraded browser socket until either side stops.
    ///
    /// # Errors
    /// Returns the failure that ended the relay. Both the socket and the live
    /// session are closed in every case.
    pub async fn run(&self, socket: WebSocket) -> Result<RelayExit, RelayError> {
        let (sink, stream) = socket.split();
        self.run_with(sink, stream).await
    }

    /// [`Relay::run`] over any sink/stream pair carrying websocket messages.
    ///
    /// # Errors
    /// Returns the failure that ended the relay.
    pub async fn run_with<Tx, Rx, E>(
        &self,
        mut client_tx: Tx,
        client_rx: Rx,
    ) -> Result<RelayExit, RelayError>
    where
        Tx: Sink<Message> + Send + Unpin + 'static,
        Tx::Error: fmt::Display + Send,
        Rx: Stream<Item = Result<Message, E>> + Send + Unpin + 'static,
        E: fmt::Display + Send + 'static,
    {
        let relay_id = Uuid::new_v4();
        let span = tracing::info_span!("relay", %relay_id);

        async move {
            let session = match self.factory.connect(&self.model, &self.config).await {
                Ok(session) => session,
                Err(e) => {
                    tracing::error!(model = %self.model, "Failed to open live session: {e}");
                    close_client(&mut client_tx, CLOSE_TIMEOUT).await;
                    return Err(RelayError::Connect(e));
                }
            };
            tracing::info!(model = %self.model, "Relay started");

            let cancel = self.shutdown.child_token();
            let ctx = PumpContext {
                session: Arc::clone(&session),
                cancel: cancel.clone(),
                options: self.options.clone(),
            };
            let upstream = tokio::spawn(pump_upstream(ctx.clone(), client_tx).in_current_span());
            let client = tokio::spawn(pump_client(ctx, client_rx).in_current_span());

            // Both pumps cancel on exit, so this always runs.
            let release = async {
                cancel.cancelled().await;
                if let Err(e) = session.close().await {
                    tracing::debug!("Failed to close live session: {e}");
                }
            };
            let (upstream, client, ()) = tokio::join!(upstream, client, release);

            let outcome = settle(
                upstream.map_err(RelayError::from).and_then(|r| r),
                client.map_err(RelayError::from).and_then(|r| r),
            );
            match &outcome {
                Ok(exit) => tracing::info!(?exit, "Relay finished"),
                Err(e) => tracing::warn!("Relay failed: {e}"),
            }
            outcome
        }
        .instrument(span)
        .await
    }
}

/// Combine pump results: any failure wins, otherwise the exit observed by the
/// pump that stopped first.
fn settle(
    upstream: Result<RelayExit, RelayError>,
    client: Result<RelayExit, RelayError>,
) -> Result<RelayExit, RelayError> {
    match (upstream, client) {
        (Err(e), _) | (_, Err(e)) => Err(e),
        (Ok(RelayExit::Cancelled), Ok(exit)) | (Ok(exit), _) => Ok(exit),
    }
}

#[derive(Clone)]
struct PumpContext {
    session: Arc<dyn LiveSession>,
    cancel: CancellationToken,
    options: RelayOptions,
}

impl PumpContext {
    /// Await a write to `target` under the write timeout. Yields `None` once
    /// the relay is cancelled.
    async fn write<F: Future>(
        &self,
        target: &'static str,
        fut: F,
    ) -> Result<Option<F::Output>, RelayError> {
        let bounded = async {
            match self.options.write_timeout {
                Some(limit) => tokio::time::timeout(limit, fut)
                    .await
                    .map_err(|_| RelayError::WriteTimeout(target)),
                None => Ok(fut.await),
            }
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Ok(None),
            output = bounded => output.map(Some),
        }
    }
}

/// Names declared in `config` that `handler` does not serve.
fn unhandled_functions<'a>(
    config: &'a LiveConnectConfig,
    handler: &dyn ToolHandler,
) -> Vec<&'a str> {
    config
        .declared_functions()
        .filter(|name| !handler.handles(name))
        .collect()
}

async fn close_client<Tx>(client_tx: &mut Tx, limit: Duration)
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: fmt::Display,
{
    match tokio::time::timeout(limit, client_tx.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("Failed to close client socket: {e}"),
        Err(_) => tracing::debug!("Timed out closing client socket"),
    }
}

async fn pump_upstream<Tx>(ctx: PumpContext, mut client_tx: Tx) -> Result<RelayExit, RelayError>
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: fmt::Display,
{
    let _stop = ctx.cancel.clone().drop_guard();
    let result = forward_upstream(&ctx, &mut client_tx).await;
    ctx.cancel.cancel();
    let limit = ctx.options.write_timeout.unwrap_or(CLOSE_TIMEOUT);
    close_client(&mut client_tx, limit).await;
    result
}

async fn forward_upstream<Tx>(
    ctx: &PumpContext,
    client_tx: &mut Tx,
) -> Result<RelayExit, RelayError>
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: fmt::Display,
{
    loop {
        let received = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Ok(RelayExit::Cancelled),
            received = ctx.session.receive() => received,
        };
        let Some(message) = received.map_err(RelayError::Upstream)? else {
            tracing::info!("Live session closed");
            return Ok(RelayExit::UpstreamClosed);
        };

        match classify(message, ctx.options.forward_policy) {
            Classified::ToolCalls(batch) => {
                tracing::debug!(calls = batch.function_calls.len(), "Answering tool call");
                let response = tokio::select! {
                    biased;
                    () = ctx.cancel.cancelled() => return Ok(RelayExit::Cancelled),
                    response = build_tool_responses(
                        &batch,
                        ctx.options.tool_handler.as_ref(),
                        ctx.options.tool_timeout,
                    ) => response,
                };
                let sent = ctx.write("live session", ctx.session.send_tool_response(response));
                let Some(sent) = sent.await? else {
                    return Ok(RelayExit::Cancelled);
                };
                sent.map_err(RelayError::Upstream)?;
            }
            Classified::Forward(message) => {
                tracing::trace!(
                    kind = message.kind(),
                    text = ?message.server_content.as_ref().and_then(ServerContent::text),
                    "Forwarding server message"
                );
                let text = encode_server_message(&message).map_err(RelayError::Encode)?;
                let sent = ctx.write("client", client_tx.send(Message::Text(text.into())));
                let Some(sent) = sent.await? else {
                    return Ok(RelayExit::Cancelled);
                };
                sent.map_err(|e| RelayError::ClientWrite(e.to_string()))?;
            }
            Classified::Ignore(message) => {
                tracing::trace!(kind = message.kind(), "Dropping server message");
            }
        }
    }
}

async fn pump_client<Rx, E>(ctx: PumpContext, mut client_rx: Rx) -> Result<RelayExit, RelayError>
where
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let _stop = ctx.cancel.clone().drop_guard();
    loop {
        let frame = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Ok(RelayExit::Cancelled),
            frame = client_rx.next() => frame,
        };

        let decoded = match frame {
            None | Some(Ok(Message::Close(_))) => {
                tracing::info!("Client disconnected");
                return Ok(RelayExit::ClientClosed);
            }
            Some(Err(e)) => return Err(RelayError::ClientRead(e.to_string())),
            Some(Ok(Message::Text(text))) => decode_client_frame(text.as_str().as_bytes()),
            Some(Ok(Message::Binary(data))) => decode_client_frame(&data),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
        };
        let input = decoded.map_err(RelayError::Decode)?;

        let sent = ctx.write("live session", ctx.session.send_realtime_input(input));
        let Some(sent) = sent.await? else {
            return Ok(RelayExit::Cancelled);
        };
        sent.map_err(RelayError::Upstream)?;
    }
}

#[cfg(test)]
mod tests {
    use std::{
        convert::Infallible,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use futures::channel::mpsc as client_channel;
    use live_relay_core::{
        RealtimeInput, ServerMessage, ToolRegistry, ToolResponse, protocol::FunctionCall,
    };
    use serde_json::{Value, json};
    use tokio::{
        sync::{Mutex, mpsc},
        task::JoinHandle,
    };
    use tokio_test::assert_ok;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct FakeSession {
        incoming: Mutex<mpsc::UnboundedReceiver<ServerMessage>>,
        inputs: mpsc::UnboundedSender<RealtimeInput>,
        tool_responses: mpsc::UnboundedSender<ToolResponse>,
        closes: AtomicUsize,
        /// Sends never complete, like a live session with a full socket.
        stall_sends: bool,
    }

    type FakeEnds = (
        Arc<FakeSession>,
        mpsc::UnboundedSender<ServerMessage>,
        mpsc::UnboundedReceiver<RealtimeInput>,
        mpsc::UnboundedReceiver<ToolResponse>,
    );

    fn fake_session(stall_sends: bool) -> FakeEnds {
        let (upstream_tx, upstream_rx) = mpsc::unbounded_channel();
        let (inputs_tx, inputs) = mpsc::unbounded_channel();
        let (tools_tx, tool_responses) = mpsc::unbounded_channel();
        let session = Arc::new(FakeSession {
            incoming: Mutex::new(upstream_rx),
            inputs: inputs_tx,
            tool_responses: tools_tx,
            closes: AtomicUsize::new(0),
            stall_sends,
        });
        (session, upstream_tx, inputs, tool_responses)
    }

    fn relay_for(session: &Arc<FakeSession>, config: LiveConnectConfig) -> Relay {
        let factory = Arc::new(FakeFactory {
            session: Some(Arc::clone(session)),
            connects: AtomicUsize::new(0),
        });
        Relay::new(factory, "test-model", config)
    }

    /// A client sink whose writes never complete.
    fn stalled_client() -> impl Sink<Message, Error = Infallible> + Send + Unpin + 'static {
        Box::pin(futures::sink::unfold((), |(), _frame: Message| {
            futures::future::pending::<Result<(), Infallible>>()
        }))
    }

    #[async_trait]
    impl LiveSession for FakeSession {
        async fn receive(&self) -> Result<Option<ServerMessage>, SessionError> {
            Ok(self.incoming.lock().await.recv().await)
        }

        async fn send_realtime_input(&self, input: RealtimeInput) -> Result<(), SessionError> {
            if self.stall_sends {
                futures::future::pending::<()>().await;
            }
            self.inputs.send(input).map_err(|_| SessionError::Closed)
        }

        async fn send_tool_response(&self, response: ToolResponse) -> Result<(), SessionError> {
            self.tool_responses.send(response).map_err(|_| SessionError::Closed)
        }

        async fn close(&self) -> Result<(), SessionError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeFactory {
        session: Option<Arc<FakeSession>>,
        connects: AtomicUsize,
    }

    #[async_trait]
    impl SessionFactory for FakeFactory {
        async fn connect(
            &self,
            _model: &str,
            _config: &LiveConnectConfig,
        ) -> Result<Arc<dyn LiveSession>, SessionError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            match &self.session {
                Some(session) => Ok(Arc::clone(session) as Arc<dyn LiveSession>),
                None => Err(SessionError::Connect("connection refused".to_string())),
            }
        }
    }

    /// Both ends of a running relay, seen from the test.
    struct Harness {
        upstream: Option<mpsc::UnboundedSender<ServerMessage>>,
        inputs: mpsc::UnboundedReceiver<RealtimeInput>,
        tool_responses: mpsc::UnboundedReceiver<ToolResponse>,
        session: Arc<FakeSession>,
        browser: Option<client_channel::UnboundedSender<Result<Message, Infallible>>>,
        frames: client_channel::UnboundedReceiver<Message>,
        relay: Relay,
        task: JoinHandle<Result<RelayExit, RelayError>>,
    }

    impl Harness {
        fn start() -> Self {
            Self::start_with(RelayOptions::default())
        }

        fn start_with(options: RelayOptions) -> Self {
            Self::start_session(fake_session(false), options)
        }

        fn start_session(ends: FakeEnds, options: RelayOptions) -> Self {
            let (session, upstream_tx, inputs, tool_responses) = ends;
            let relay =
                relay_for(&session, LiveConnectConfig::default_demo()).with_options(options);

            let (browser, client_rx) = client_channel::unbounded();
            let (client_tx, frames) = client_channel::unbounded();
            let runner = relay.clone();
            let task = tokio::spawn(async move { runner.run_with(client_tx, client_rx).await });

            Self {
                upstream: Some(upstream_tx),
                inputs,
                tool_responses,
                session,
                browser: Some(browser),
                frames,
                relay,
                task,
            }
        }

        fn send_text(&self, text: &str) {
            self.browser
                .as_ref()
                .unwrap()
                .unbounded_send(Ok(Message::Text(text.to_string().into())))
                .unwrap();
        }

        fn emit(&self, message: Value) {
            let message: ServerMessage = serde_json::from_value(message).unwrap();
            self.upstream.as_ref().unwrap().send(message).unwrap();
        }

        async fn next_frame(&mut self) -> Option<Value> {
            let frame = tokio::time::timeout(TIMEOUT, self.frames.next()).await.unwrap()?;
            match frame {
                Message::Text(text) => Some(serde_json::from_str(text.as_str()).unwrap()),
                other => panic!("Unexpected frame: {other:?}"),
            }
        }

        async fn finish(self) -> (Result<RelayExit, RelayError>, Arc<FakeSession>) {
            let result = tokio::time::timeout(TIMEOUT, self.task).await.unwrap().unwrap();
            (result, self.session)
        }
    }

    #[tokio::test]
    async fn test_client_frames_forwarded_in_order() {
        let mut h = Harness::start();
        for i in 0..5 {
            h.send_text(&format!(r#"{{"text":"msg-{i}"}}"#));
        }
        for i in 0..5 {
            let input = tokio::time::timeout(TIMEOUT, h.inputs.recv()).await.unwrap().unwrap();
            assert_eq!(input, RealtimeInput::text(format!("msg-{i}")));
        }
    }

    #[tokio::test]
    async fn test_binary_frames_are_decoded() {
        let mut h = Harness::start();
        h.browser
            .as_ref()
            .unwrap()
            .unbounded_send(Ok(Message::Binary(br#"{"text":"bin"}"#.to_vec().into())))
            .unwrap();
        let input = tokio::time::timeout(TIMEOUT, h.inputs.recv()).await.unwrap().unwrap();
        assert_eq!(input.text.as_deref(), Some("bin"));
    }

    #[tokio::test]
    async fn test_server_content_forwarded_in_order() {
        let mut h = Harness::start();
        h.emit(json!({ "serverContent": { "text": "hi" } }));
        for i in 0..3 {
            let parts = json!([{ "text": i.to_string() }]);
            h.emit(json!({ "serverContent": { "modelTurn": { "parts": parts } } }));
        }

        let first = h.next_frame().await.unwrap();
        assert_eq!(first["serverContent"]["text"], "hi");
        for i in 0..3 {
            let frame = h.next_frame().await.unwrap();
            assert_eq!(frame["serverContent"]["modelTurn"]["parts"][0]["text"], i.to_string());
        }
    }

    #[tokio::test]
    async fn test_tool_call_answered_not_forwarded() {
        let mut h = Harness::start();
        h.emit(json!({
            "toolCall": { "functionCalls": [{ "id": "1", "name": "turn_on_the_lights" }] }
        }));
        h.emit(json!({ "serverContent": { "turnComplete": true } }));

        let response = tokio::time::timeout(TIMEOUT, h.tool_responses.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "functionResponses": [
                    { "id": "1", "name": "turn_on_the_lights", "response": { "ok": "true" } }
                ]
            })
        );

        // The first thing the browser sees is the content, not the tool call.
        let frame = h.next_frame().await.unwrap();
        assert!(frame.get("toolCall").is_none());
        assert_eq!(frame["serverContent"]["turnComplete"], true);
    }

    #[tokio::test]
    async fn test_custom_tool_handler() {
        struct Lights;

        #[async_trait]
        impl ToolHandler for Lights {
            async fn call(&self, call: &FunctionCall) -> Result<Value, live_relay_core::ToolError> {
                Ok(json!({ "room": call.args.as_ref().and_then(|a| a.get("room")).cloned() }))
            }
        }

        let mut h = Harness::start_with(RelayOptions {
            tool_handler: Arc::new(Lights),
            ..RelayOptions::default()
        });
        h.emit(json!({
            "toolCall": { "functionCalls": [
                { "id": "a", "name": "lights", "args": { "room": "kitchen" } },
                { "id": "b", "name": "lights", "args": { "room": "hall" } }
            ] }
        }));

        let response = tokio::time::timeout(TIMEOUT, h.tool_responses.recv())
            .await
            .unwrap()
            .unwrap();
        let ids: Vec<_> = response
            .function_responses
            .iter()
            .map(|r| (r.id.clone().unwrap(), r.response["room"].clone()))
            .collect();
        assert_eq!(
            ids,
            vec![("a".to_string(), json!("kitchen")), ("b".to_string(), json!("hall"))]
        );
    }

    #[tokio::test]
    async fn test_client_close_releases_session() {
        let mut h = Harness::start();
        h.send_text(r#"{"text":"bye"}"#);
        let _ = tokio::time::timeout(TIMEOUT, h.inputs.recv()).await.unwrap();

        // Upstream stays silent; the upstream pump is parked in receive.
        h.browser.take();
        assert!(h.next_frame().await.is_none());

        let (result, session) = h.finish().await;
        assert_eq!(assert_ok!(result), RelayExit::ClientClosed);
        assert_eq!(session.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_frame_ends_relay() {
        let h = Harness::start();
        h.browser
            .as_ref()
            .unwrap()
            .unbounded_send(Ok(Message::Close(None)))
            .unwrap();
        let (result, session) = h.finish().await;
        assert_eq!(assert_ok!(result), RelayExit::ClientClosed);
        assert_eq!(session.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upstream_close_releases_client() {
        let mut h = Harness::start();
        h.upstream.take();

        // The client pump is parked in receive; the socket must still close.
        assert!(h.next_frame().await.is_none());

        let (result, session) = h.finish().await;
        assert_eq!(assert_ok!(result), RelayExit::UpstreamClosed);
        assert_eq!(session.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_closes_client() {
        let factory = Arc::new(FakeFactory {
            session: None,
            connects: AtomicUsize::new(0),
        });
        let relay = Relay::new(
            Arc::clone(&factory) as Arc<dyn SessionFactory>,
            "test-model",
            LiveConnectConfig::default(),
        );

        let (browser, client_rx) = client_channel::unbounded::<Result<Message, Infallible>>();
        let (client_tx, mut frames) = client_channel::unbounded();
        browser
            .unbounded_send(Ok(Message::Text(r#"{"text":"early"}"#.into())))
            .unwrap();

        let result = tokio::time::timeout(TIMEOUT, relay.run_with(client_tx, client_rx))
            .await
            .unwrap();
        assert!(matches!(result, Err(RelayError::Connect(_))));
        assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
        assert!(frames.next().await.is_none());
        assert!(browser.is_closed());
    }

    #[tokio::test]
    async fn test_malformed_frame_ends_only_its_relay() {
        let broken = Harness::start();
        let mut healthy = Harness::start();

        broken.send_text("definitely not json");
        let (result, session) = broken.finish().await;
        assert!(matches!(result, Err(RelayError::Decode(_))));
        assert_eq!(session.closes.load(Ordering::SeqCst), 1);

        healthy.send_text(r#"{"text":"still here"}"#);
        let input = tokio::time::timeout(TIMEOUT, healthy.inputs.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(input.text.as_deref(), Some("still here"));
        healthy.emit(json!({ "serverContent": { "text": "pong" } }));
        assert_eq!(healthy.next_frame().await.unwrap()["serverContent"]["text"], "pong");
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_client() {
        let mut h = Harness::start();
        h.send_text("{");
        assert!(h.next_frame().await.is_none());
        let (result, _session) = h.finish().await;
        assert!(matches!(result, Err(RelayError::Decode(_))));
    }

    #[tokio::test]
    async fn test_shutdown_token_stops_relay() {
        let mut h = Harness::start();
        h.relay.shutdown_token().cancel();
        assert!(h.next_frame().await.is_none());
        let (result, session) = h.finish().await;
        assert_eq!(assert_ok!(result), RelayExit::Cancelled);
        assert_eq!(session.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_forward_all_policy() {
        let mut h = Harness::start_with(RelayOptions {
            forward_policy: ForwardPolicy::All,
            ..RelayOptions::default()
        });
        h.emit(json!({ "goAway": { "timeLeft": "5s" } }));
        assert_eq!(h.next_frame().await.unwrap()["goAway"]["timeLeft"], "5s");
    }

    #[tokio::test]
    async fn test_content_only_policy_drops_other_messages() {
        let mut h = Harness::start();
        h.emit(json!({ "usageMetadata": { "totalTokenCount": 3 } }));
        h.emit(json!({ "serverContent": { "interrupted": true } }));
        let frame = h.next_frame().await.unwrap();
        assert!(frame.get("usageMetadata").is_none());
        assert_eq!(frame["serverContent"]["interrupted"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_client_write_times_out() {
        let (session, upstream_tx, _inputs, _tools) = fake_session(false);
        let relay = relay_for(&session, LiveConnectConfig::default()).with_options(RelayOptions {
            write_timeout: Some(Duration::from_secs(1)),
            ..RelayOptions::default()
        });
        let (_browser, client_rx) = client_channel::unbounded::<Result<Message, Infallible>>();

        upstream_tx
            .send(ServerMessage::content(ServerContent::default()))
            .unwrap();
        let result = relay.run_with(stalled_client(), client_rx).await;

        assert!(matches!(result, Err(RelayError::WriteTimeout("client"))));
        assert_eq!(session.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upstream_close_interrupts_stalled_session_send() {
        let mut h = Harness::start_session(fake_session(true), RelayOptions::default());
        h.send_text(r#"{"text":"never delivered"}"#);
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The client pump is parked in a send that never completes.
        h.upstream.take();
        assert!(h.next_frame().await.is_none());

        let (result, session) = h.finish().await;
        assert_eq!(assert_ok!(result), RelayExit::UpstreamClosed);
        assert_eq!(session.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_error_interrupts_stalled_client_write() {
        let (session, upstream_tx, _inputs, _tools) = fake_session(false);
        let relay = relay_for(&session, LiveConnectConfig::default());
        let (browser, client_rx) = client_channel::unbounded::<Result<Message, Infallible>>();

        upstream_tx
            .send(ServerMessage::content(ServerContent::default()))
            .unwrap();
        let task = tokio::spawn(async move { relay.run_with(stalled_client(), client_rx).await });

        // Let the upstream pump block on the client write, with no write timeout.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.closes.load(Ordering::SeqCst), 0);
        browser
            .unbounded_send(Ok(Message::Text("not json".into())))
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(30), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(RelayError::Decode(_))));
        assert_eq!(session.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unhandled_declared_functions() {
        let config = LiveConnectConfig::default_demo();
        assert!(unhandled_functions(&config, &AcknowledgeHandler).is_empty());

        let registry = ToolRegistry::new().with("dim_the_lights", AcknowledgeHandler);
        assert_eq!(unhandled_functions(&config, &registry), vec!["turn_on_the_lights"]);

        let registry = registry.with("turn_on_the_lights", AcknowledgeHandler);
        assert!(unhandled_functions(&config, &registry).is_empty());
    }

    #[test]
    fn test_settle_prefers_errors_then_first_exit() {
        let err = settle(Ok(RelayExit::Cancelled), Err(RelayError::ClientRead("reset".into())));
        assert!(matches!(err, Err(RelayError::ClientRead(_))));

        let exit = settle(Ok(RelayExit::Cancelled), Ok(RelayExit::ClientClosed)).unwrap();
        assert_eq!(exit, RelayExit::ClientClosed);

        let exit = settle(Ok(RelayExit::UpstreamClosed), Ok(RelayExit::Cancelled)).unwrap();
        assert_eq!(exit, RelayExit::UpstreamClosed);
    }
}

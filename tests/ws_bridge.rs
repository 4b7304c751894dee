// WebSocket bridging over real sockets: an axum gateway on an ephemeral port,
// a tungstenite downstream, and tungstenite clients driving the handshake.
#[cfg(test)]
mod test {
    use std::{
        net::SocketAddr,
        sync::Arc,
        time::{Duration, Instant},
    };

    use axum::{Router, body::Body as AxumBody};
    use futures_util::{SinkExt, StreamExt};
    use hyper::{Request, Response};
    use peregrine::{
        BreakerRegistry, BreakerSettings, GatewayState, HealthChecker, HttpClient,
        HttpProxyDispatcher, PathRewriter, ServiceRegistry, SessionRegistry, WebSocketBridge,
        build_router,
        config::models::{GatewayConfig, GatewaySettings, ServiceConfig, WebsocketEndpointConfig},
        ports::HttpClientResult,
    };
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, accept_async, connect_async,
        tungstenite::{
            Error as WsError, Message,
            protocol::{CloseFrame, frame::coding::CloseCode},
        },
    };

    type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// The bridge tests never dispatch plain HTTP, but the router state still
    /// needs a client for the dispatcher and the health checker.
    struct NullClient;

    #[async_trait::async_trait]
    impl HttpClient for NullClient {
        async fn send_request(
            &self,
            _req: Request<AxumBody>,
        ) -> HttpClientResult<Response<AxumBody>> {
            Ok(Response::new(AxumBody::from("ok")))
        }

        async fn health_check(&self, _url: &str, _timeout: Duration) -> HttpClientResult<bool> {
            Ok(true)
        }
    }

    /// One "chat" service whose WebSocket endpoint points at `downstream`.
    fn chat_config(downstream: SocketAddr, resource_param: Option<&str>) -> GatewayConfig {
        GatewayConfig::builder()
            .gateway(GatewaySettings {
                default_timeout_ms: 1000,
                failure_threshold: 5,
                cooldown_ms: 60_000,
                // Refused connections fail instantly; keep the bound tight so
                // a misbehaving test cannot stall the suite.
                ws_connect_timeout_ms: 1000,
                retry_after_secs: 30,
            })
            .service(
                "chat",
                ServiceConfig {
                    base_url: format!("http://{downstream}"),
                    websocket: Some(WebsocketEndpointConfig {
                        upgrade_path: "/api/chat/ws".to_string(),
                        user_param: "userId".to_string(),
                        resource_param: resource_param.map(str::to_string),
                        downstream_path: Some("/".to_string()),
                    }),
                    ..ServiceConfig::default()
                },
            )
            .build()
    }

    fn gateway_app(config: &GatewayConfig) -> Router {
        let client: Arc<dyn HttpClient> = Arc::new(NullClient);
        let registry = Arc::new(ServiceRegistry::from_config(config));
        let rewriter = Arc::new(PathRewriter::new(Arc::clone(&registry)));
        let breakers = Arc::new(BreakerRegistry::new(BreakerSettings {
            failure_threshold: config.gateway.failure_threshold,
            cooldown: Duration::from_millis(config.gateway.cooldown_ms),
        }));
        let state = GatewayState {
            dispatcher: Arc::new(HttpProxyDispatcher::new(
                Arc::clone(&client),
                Arc::clone(&rewriter),
                Arc::clone(&breakers),
                config.gateway.retry_after_secs,
            )),
            bridge: Arc::new(WebSocketBridge::new(
                rewriter,
                Arc::new(SessionRegistry::default()),
                Duration::from_millis(config.gateway.ws_connect_timeout_ms),
            )),
            breakers,
            health: Arc::new(HealthChecker::new(
                &registry,
                client,
                config.health_check.clone(),
            )),
            listen_addr: config.listen_addr.clone(),
            started_at: Instant::now(),
        };
        build_router(&registry, state)
    }

    /// Serve the router on an ephemeral port and return its address. The
    /// listener is bound before spawning, so clients can connect right away.
    async fn serve_gateway(app: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        addr
    }

    /// Downstream that echoes text and binary frames back to the bridge.
    async fn spawn_echo_downstream() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        let reply = match msg {
                            Message::Text(_) | Message::Binary(_) => msg,
                            Message::Close(frame) => {
                                let _ = ws.send(Message::Close(frame)).await;
                                break;
                            }
                            _ => continue,
                        };
                        if ws.send(reply).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    /// Downstream that accepts the handshake and immediately closes with the
    /// given code.
    async fn spawn_closing_downstream(code: u16, reason: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = ws.send(Message::Close(Some(frame))).await;
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        });
        addr
    }

    /// An address nothing listens on: bind an ephemeral port, then free it.
    async fn unreachable_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    async fn connect_client(gateway: SocketAddr, path_and_query: &str) -> ClientSocket {
        let (socket, _response) = connect_async(format!("ws://{gateway}{path_and_query}"))
            .await
            .expect("websocket handshake");
        socket
    }

    async fn next_message(socket: &mut ClientSocket) -> Message {
        tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended unexpectedly")
            .expect("frame error")
    }

    fn parse_notice(msg: Message) -> serde_json::Value {
        match msg {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected a text notice, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upgrade_rejected_without_user_param() {
        let echo = spawn_echo_downstream().await;
        let gateway = serve_gateway(gateway_app(&chat_config(echo, None))).await;

        let err = connect_async(format!("ws://{gateway}/api/chat/ws"))
            .await
            .expect_err("handshake must be refused before the upgrade");
        match err {
            WsError::Http(response) => assert_eq!(response.status(), 400),
            other => panic!("expected an HTTP rejection, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_configured_resource_param_is_required() {
        let echo = spawn_echo_downstream().await;
        let gateway = serve_gateway(gateway_app(&chat_config(echo, Some("clanId")))).await;

        let err = connect_async(format!("ws://{gateway}/api/chat/ws?userId=7"))
            .await
            .expect_err("missing clanId must be refused");
        match err {
            WsError::Http(response) => assert_eq!(response.status(), 400),
            other => panic!("expected an HTTP rejection, got {other:?}"),
        }

        // Both parameters present: the handshake succeeds.
        let mut client = connect_client(gateway, "/api/chat/ws?userId=7&clanId=3").await;
        let _ = client.close(None).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_paired_session_relays_both_directions() {
        let echo = spawn_echo_downstream().await;
        let gateway = serve_gateway(gateway_app(&chat_config(echo, None))).await;

        let mut client = connect_client(gateway, "/api/chat/ws?userId=7").await;

        client
            .send(Message::text("hello through the bridge"))
            .await
            .unwrap();
        match next_message(&mut client).await {
            Message::Text(text) => assert_eq!(text.as_str(), "hello through the bridge"),
            other => panic!("expected the echoed text, got {other:?}"),
        }

        client
            .send(Message::binary(vec![0x42, 0x10, 0x99]))
            .await
            .unwrap();
        match next_message(&mut client).await {
            Message::Binary(bytes) => assert_eq!(bytes.as_ref(), &[0x42, 0x10, 0x99][..]),
            other => panic!("expected the echoed binary frame, got {other:?}"),
        }

        let _ = client.close(None).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fallback_notice_when_downstream_unreachable() {
        let dead = unreachable_addr().await;
        let gateway = serve_gateway(gateway_app(&chat_config(dead, Some("clanId")))).await;

        let mut client = connect_client(gateway, "/api/chat/ws?userId=7&clanId=3").await;

        let notice = parse_notice(next_message(&mut client).await);
        assert_eq!(notice["type"], "connection");
        assert_eq!(notice["fallbackMode"], true);
        assert_eq!(notice["service"], "chat");
        assert_eq!(notice["userId"], "7");
        assert_eq!(notice["resourceId"], "3");
        assert!(notice["timestamp"].is_string());

        let _ = client.close(None).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_new_connection_displaces_previous_session() {
        let dead = unreachable_addr().await;
        let gateway = serve_gateway(gateway_app(&chat_config(dead, None))).await;

        let mut first = connect_client(gateway, "/api/chat/ws?userId=42").await;
        parse_notice(next_message(&mut first).await);

        // Same user connects again; the old session must be told to go.
        let mut second = connect_client(gateway, "/api/chat/ws?userId=42").await;
        parse_notice(next_message(&mut second).await);

        match next_message(&mut first).await {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 1000);
                assert_eq!(frame.reason.as_str(), "New connection established");
            }
            other => panic!("expected the displacement close, got {other:?}"),
        }

        let _ = second.close(None).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_downstream_close_code_passes_through() {
        let downstream = spawn_closing_downstream(4001, "session evicted").await;
        let gateway = serve_gateway(gateway_app(&chat_config(downstream, None))).await;

        let mut client = connect_client(gateway, "/api/chat/ws?userId=9").await;

        match next_message(&mut client).await {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 4001);
                assert_eq!(frame.reason.as_str(), "session evicted");
            }
            other => panic!("expected the downstream close frame, got {other:?}"),
        }
    }
}

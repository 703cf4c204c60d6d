fn main() {
    println!("Run `cargo test -p end-to-end` to execute the loopback scenarios.");
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use mobilelink_client::{
        ConnectError, ConnectionSession, FileTransferAssembler, MemorySink, SessionConfig,
        SessionEvent, SessionState, TransferEvent,
    };
    use mobilelink_protocol::constants::{DEFAULT_CHUNK_SIZE, MessageType};
    use mobilelink_protocol::{Envelope, FramingError, codec, decode_chunk};
    use mobilelink_server::{ServerConfig, ServerError, ServerListener};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    const WAIT: Duration = Duration::from_secs(5);

    struct Hub {
        server: Arc<ServerListener>,
        port: u16,
        handle: JoinHandle<Result<(), ServerError>>,
    }

    impl Hub {
        async fn start(dir: &Path) -> Self {
            let server = ServerListener::new(ServerConfig {
                port: 0,
                serving_dir: dir.to_path_buf(),
                stats_interval: Duration::from_secs(60),
                base_delay: Duration::ZERO,
            });
            let server_run = Arc::clone(&server);
            let handle = tokio::spawn(async move { server_run.run().await });

            let mut port = 0;
            for _ in 0..200 {
                port = server.port().await;
                if port > 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert!(port > 0, "hub did not bind");
            Self {
                server,
                port,
                handle,
            }
        }

        async fn wait_active(&self, expected: usize) {
            let stats = self.server.stats();
            for _ in 0..500 {
                if stats.active_connections() == expected {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!(
                "active connections stuck at {}, expected {expected}",
                stats.active_connections()
            );
        }

        async fn stop(self) {
            self.server.shutdown();
            tokio::time::timeout(WAIT, self.handle)
                .await
                .expect("hub shutdown hung")
                .unwrap()
                .unwrap();
        }
    }

    fn fast_config() -> SessionConfig {
        SessionConfig {
            reconnect_delay: Duration::from_millis(20),
            max_attempts: 3,
            connect_timeout: Duration::from_secs(1),
            ..SessionConfig::default()
        }
    }

    async fn connected_client(port: u16) -> (ConnectionSession, mpsc::Receiver<SessionEvent>) {
        let session = ConnectionSession::new(fast_config());
        let events = session.take_events().await.unwrap();
        session.connect("127.0.0.1", port).await.unwrap();
        assert_eq!(session.state().await, SessionState::Connected);
        (session, events)
    }

    /// Receives events until `pred` matches, failing after [`WAIT`].
    async fn wait_for<F>(events: &mut mpsc::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = events.recv().await.expect("event channel closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    fn is_message(event: &SessionEvent, msg_type: MessageType) -> bool {
        matches!(event, SessionEvent::Message(env) if env.msg_type == msg_type)
    }

    #[tokio::test]
    async fn heartbeat_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = Hub::start(tmp.path()).await;
        let (session, mut events) = connected_client(hub.port).await;

        session.send(&Envelope::heartbeat()).await.unwrap();
        wait_for(&mut events, |e| is_message(e, MessageType::HeartbeatAck)).await;

        session.close().await;
        hub.wait_active(0).await;
        hub.stop().await;
    }

    #[tokio::test]
    async fn empty_directory_sends_nothing_and_chat_still_works() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = Hub::start(tmp.path()).await;
        let (session, mut events) = connected_client(hub.port).await;

        session.request_files().await.unwrap();
        session.send_chat("hello hub").await.unwrap();
        session.send(&Envelope::heartbeat()).await.unwrap();

        // Frames are answered in order, so nothing file related can
        // arrive after the ack.
        let event = wait_for(&mut events, |e| matches!(e, SessionEvent::Message(_))).await;
        assert!(is_message(&event, MessageType::HeartbeatAck), "{event:?}");
        assert_eq!(hub.server.stats().total_bytes(), 0);

        session.close().await;
        hub.stop().await;
    }

    #[tokio::test]
    async fn streams_and_reassembles_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(tmp.path().join("photo.jpg"), &data).unwrap();

        let hub = Hub::start(tmp.path()).await;
        let (session, mut events) = connected_client(hub.port).await;
        let mut assembler = FileTransferAssembler::new(MemorySink::new());

        session.request_files().await.unwrap();

        let mut chunk_sizes = Vec::new();
        let completed = tokio::time::timeout(WAIT, async {
            loop {
                let Some(SessionEvent::Message(env)) = events.recv().await else {
                    continue;
                };
                if env.msg_type == MessageType::FileChunk {
                    chunk_sizes.push(decode_chunk(env.content_str().unwrap()).unwrap().len());
                }
                if let Some(event @ TransferEvent::Completed { .. }) = assembler.handle(&env) {
                    return event;
                }
            }
        })
        .await
        .expect("transfer did not complete");

        assert_eq!(
            completed,
            TransferEvent::Completed {
                filename: "photo.jpg".into(),
                size: 50_000,
                verified: true,
            }
        );
        assert_eq!(chunk_sizes, vec![16_384, 16_384, 16_384, 848]);
        assert!(chunk_sizes.iter().all(|&n| n <= DEFAULT_CHUNK_SIZE));
        assert_eq!(assembler.sink().files(), &[("photo.jpg".to_string(), data)]);
        assert_eq!(hub.server.stats().total_bytes(), 50_000);

        session.close().await;
        hub.wait_active(0).await;
        hub.stop().await;
    }

    #[tokio::test]
    async fn reported_quality_shrinks_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.bin"), vec![1u8; 10_000]).unwrap();

        let hub = Hub::start(tmp.path()).await;
        let (session, mut events) = connected_client(hub.port).await;

        session.report_network_quality(0.1).await.unwrap();
        session.request_files().await.unwrap();

        let mut sizes = Vec::new();
        loop {
            match wait_for(&mut events, |e| matches!(e, SessionEvent::Message(_))).await {
                SessionEvent::Message(env) if env.msg_type == MessageType::FileChunk => {
                    sizes.push(decode_chunk(env.content_str().unwrap()).unwrap().len());
                }
                SessionEvent::Message(env) if env.msg_type == MessageType::FileEnd => break,
                _ => {}
            }
        }
        assert_eq!(sizes, vec![4096, 4096, 1808]);

        session.close().await;
        hub.stop().await;
    }

    #[tokio::test]
    async fn several_clients_are_counted() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = Hub::start(tmp.path()).await;

        let (a, _ea) = connected_client(hub.port).await;
        let (b, _eb) = connected_client(hub.port).await;
        hub.wait_active(2).await;

        a.close().await;
        hub.wait_active(1).await;
        b.close().await;
        hub.wait_active(0).await;
        hub.stop().await;
    }

    #[tokio::test]
    async fn unknown_type_keeps_connection() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = Hub::start(tmp.path()).await;

        let mut raw = TcpStream::connect(("127.0.0.1", hub.port)).await.unwrap();
        let unknown = Envelope::new(MessageType::from("self_destruct".to_string()), "now".into());
        raw.write_all(&codec::encode(&unknown).unwrap()).await.unwrap();
        raw.write_all(&codec::encode(&Envelope::heartbeat()).unwrap())
            .await
            .unwrap();

        let reply = tokio::time::timeout(WAIT, codec::decode(&mut raw))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, Envelope::heartbeat_ack());
        assert_eq!(hub.server.stats().active_connections(), 1);

        drop(raw);
        hub.wait_active(0).await;
        hub.stop().await;
    }

    #[tokio::test]
    async fn oversized_frame_tears_down_connection() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = Hub::start(tmp.path()).await;

        let mut raw = TcpStream::connect(("127.0.0.1", hub.port)).await.unwrap();
        raw.write_all(&(200u32 * 1024 * 1024).to_be_bytes())
            .await
            .unwrap();

        let result = tokio::time::timeout(WAIT, codec::decode(&mut raw))
            .await
            .unwrap();
        assert!(
            matches!(result, Err(FramingError::EndOfStream | FramingError::Io(_))),
            "{result:?}"
        );
        hub.wait_active(0).await;
        hub.stop().await;
    }

    #[tokio::test]
    async fn connect_gives_up_after_max_attempts() {
        // Reserve a port, then free it so nothing listens there.
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let session = ConnectionSession::new(fast_config());
        let mut events = session.take_events().await.unwrap();

        let err = session.connect("127.0.0.1", port).await.unwrap_err();
        assert!(
            matches!(err, ConnectError::AttemptsExhausted { attempts: 3 }),
            "{err:?}"
        );
        assert_eq!(session.state().await, SessionState::Failed);

        let mut attempts = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::ConnectAttemptFailed { attempt, .. } = event {
                attempts.push(attempt);
            }
        }
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn hub_shutdown_drives_client_to_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = Hub::start(tmp.path()).await;
        let (session, mut events) = connected_client(hub.port).await;

        hub.stop().await;

        wait_for(&mut events, |e| matches!(e, SessionEvent::Disconnected)).await;
        wait_for(&mut events, |e| {
            matches!(e, SessionEvent::StateChanged(SessionState::Failed))
        })
        .await;
        assert_eq!(session.state().await, SessionState::Failed);
        session.close().await;
    }
}

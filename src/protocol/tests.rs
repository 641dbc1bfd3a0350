//! Protocol Module Tests
//!
//! ## Test Scopes
//! - **Grammar**: status lookup, key/value splitting, pass-through text.
//! - **Framing**: terminators, printable filtering, timeouts and size limits.
//! - **Connections**: request/response against a loopback listener.

#[cfg(test)]
mod tests {
    use crate::error::ProtocolError;
    use crate::protocol::{
        FrameReader, KvMessage, MAX_FRAME_BYTES, NodeConnection, StatusType, spawn_writer,
        write_message,
    };
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_millis(200);

    // ============================================================
    // GRAMMAR TESTS
    // ============================================================

    #[test]
    fn test_parse_put_with_spaced_value() {
        let msg = KvMessage::parse("put example 1 2 3 4 5");

        assert_eq!(msg.status(), Some(StatusType::Put));
        assert_eq!(msg.key(), Some("example"));
        assert_eq!(msg.value(), Some("1 2 3 4 5"));
    }

    #[test]
    fn test_parse_unknown_status_is_passed_through() {
        let msg = KvMessage::parse("what a weird message");

        assert_eq!(msg.status(), None);
        assert_eq!(msg.key(), None);
        assert_eq!(msg.value(), Some("what a weird message"));
        assert_eq!(msg.to_string(), "what a weird message");
    }

    #[test]
    fn test_parse_status_only_and_key_only() {
        let msg = KvMessage::parse("  KEYRANGE  ");
        assert_eq!(msg, KvMessage::new(StatusType::Keyrange));

        let msg = KvMessage::parse("GET   key1  ");
        assert_eq!(msg, KvMessage::with_key(StatusType::Get, "key1"));
    }

    #[test]
    fn test_parse_preserves_internal_whitespace() {
        let msg = KvMessage::parse("PUT key  a   b");

        assert_eq!(msg.value(), Some("a   b"));
    }

    #[test]
    fn test_status_lookup_is_case_insensitive() {
        assert_eq!(
            StatusType::from_word("put_from_coordinator_2"),
            Some(StatusType::PutFromCoordinator2)
        );
        assert_eq!(StatusType::from_word("Heartbeat"), Some(StatusType::Heartbeat));
        assert_eq!(StatusType::from_word("FAILED"), None);
    }

    #[test]
    fn test_every_status_word_round_trips() {
        for status in StatusType::ALL {
            assert_eq!(StatusType::from_word(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_format() {
        assert_eq!(
            KvMessage::with_value(StatusType::PutSuccess, "k", "v w").to_string(),
            "PUT_SUCCESS k v w"
        );
        assert_eq!(
            KvMessage::with_key(StatusType::DeleteError, "k").to_string(),
            "DELETE_ERROR k"
        );
        assert_eq!(KvMessage::new(StatusType::Rebalance).to_string(), "REBALANCE");
    }

    #[test]
    fn test_replica_slot_mapping() {
        assert_eq!(StatusType::replica_put(1), Some(StatusType::PutFromCoordinator1));
        assert_eq!(StatusType::replica_put(3), None);
        assert_eq!(StatusType::PutFromCoordinator2.replica_slot(), Some(2));
        assert_eq!(StatusType::Put.replica_slot(), None);
    }

    // ============================================================
    // FRAMING TESTS
    // ============================================================

    #[tokio::test]
    async fn test_frames_are_split_on_carriage_return() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(server, TIMEOUT);

        client
            .write_all(b"PUT a 1\n\rGET a\n\r")
            .await
            .unwrap();

        let first = reader.next_request().await.unwrap().unwrap();
        let second = reader.next_request().await.unwrap().unwrap();

        assert_eq!(first, KvMessage::with_value(StatusType::Put, "a", "1"));
        assert_eq!(second, KvMessage::with_key(StatusType::Get, "a"));
    }

    #[tokio::test]
    async fn test_non_printable_bytes_are_dropped() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(server, TIMEOUT);

        client.write_all(b"GE\x01T k\x7fey\x00\n\r").await.unwrap();

        let msg = reader.next_request().await.unwrap().unwrap();
        assert_eq!(msg, KvMessage::with_key(StatusType::Get, "key"));
    }

    #[tokio::test]
    async fn test_clean_eof_yields_none() {
        let (client, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(server, TIMEOUT);

        drop(client);

        assert!(reader.next_request().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_incomplete_frame_times_out() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(server, TIMEOUT);

        client.write_all(b"GET half").await.unwrap();

        let result = reader.next_request().await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out_response() {
        let (_client, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(server, TIMEOUT);

        assert!(matches!(
            reader.next_response().await,
            Err(ProtocolError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, server) = tokio::io::duplex(MAX_FRAME_BYTES * 2);
        let mut reader = FrameReader::new(server, Duration::from_secs(2));

        let payload = vec![b'a'; MAX_FRAME_BYTES + 10];
        client.write_all(&payload).await.unwrap();

        assert!(matches!(
            reader.next_request().await,
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_write_message_appends_terminator() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(server, TIMEOUT);

        write_message(&mut client, &KvMessage::raw("FAILED nope"))
            .await
            .unwrap();

        let msg = reader.next_response().await.unwrap();
        assert_eq!(msg.status(), None);
        assert_eq!(msg.value(), Some("FAILED nope"));
    }

    // ============================================================
    // CONNECTION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_node_connection_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, write_half) = stream.into_split();
            let mut reader = FrameReader::new(read_half, TIMEOUT);
            let tx = spawn_writer(write_half, "test-client".to_string());
            while let Ok(Some(msg)) = reader.next_request().await {
                let key = msg.key().unwrap_or_default().to_string();
                tx.send(KvMessage::with_value(StatusType::GetSuccess, key, "v"))
                    .unwrap();
            }
        });

        let mut conn = NodeConnection::connect(&addr, TIMEOUT, TIMEOUT).await.unwrap();
        let reply = conn
            .request(&KvMessage::with_key(StatusType::Get, "k"))
            .await
            .unwrap();

        assert_eq!(reply, KvMessage::with_value(StatusType::GetSuccess, "k", "v"));
        assert_eq!(conn.addr(), addr);
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = NodeConnection::connect(&addr, TIMEOUT, TIMEOUT).await;

        assert!(matches!(result, Err(ProtocolError::Connect { .. })));
    }
}

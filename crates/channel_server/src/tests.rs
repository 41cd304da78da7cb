// Scenario tests over a fully assembled server.
#[cfg(test)]
mod tests {
    use crate::messaging::{commands, encode_frame, internal, FrameDecoder};
    use crate::persistence::ChangeSet;
    use crate::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use world_core::{ManualTimeSource, Work, WorkerState};

    fn quiet_config() -> ServerConfig {
        ServerConfig {
            worker_count: 2,
            tick_interval_ms: 10,
            enable_network: false,
            ..Default::default()
        }
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_started_server_runs_scheduled_work_on_tick() {
        let mut server = create_server(quiet_config()).unwrap();
        server.start().unwrap();
        assert!(server.is_running());

        let (tx, rx) = mpsc::channel();
        server.schedule_work_in(
            Duration::from_millis(20),
            Work::new("report", move || {
                let _ = tx.send(std::thread::current().name().map(str::to_string));
            }),
        );

        let thread = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(thread.as_deref(), Some("queue"));
        // Only the daily reset stays armed
        assert_eq!(server.schedule().len(), 1);
        assert!(server.stats().ticks > 0);

        server.shutdown().unwrap();
        assert!(!server.is_running());
        assert!(server.shutdown_state().is_shutdown_complete());
        assert!(server
            .stats()
            .workers
            .iter()
            .all(|worker| worker.state == WorkerState::Stopped));
    }

    #[test]
    fn test_work_scheduled_on_a_generic_worker_runs_there() {
        let mut server = create_server(quiet_config()).unwrap();
        server.start().unwrap();

        let (tx, rx) = mpsc::channel();
        let target = server.generic_workers()[1].queue().clone();
        let due = 0;
        server.schedule_work_on(
            due,
            target,
            Work::new("report", move || {
                let _ = tx.send(std::thread::current().name().map(str::to_string));
            }),
        );

        let thread = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(thread.as_deref(), Some("generic-1"));
        server.shutdown().unwrap();
    }

    #[test]
    fn test_daily_reset_runs_at_system_midnight_and_rearms() {
        // 2024-01-01 23:59:00 UTC
        let time = Arc::new(ManualTimeSource::new(0, 1_704_153_540));
        let mut server = ChannelServer::new(quiet_config(), Vec::new(), time.clone()).unwrap();
        server.start().unwrap();
        assert_eq!(server.stats().next_scheduled, Some(60_000_000));

        server.zones().enter_zone(1, 10);
        server.zones().enter_zone(2, 10);
        server.zones().leave(2);

        time.advance_server_time(60_000_000);
        time.advance_system_time(60);
        assert!(wait_until(Duration::from_secs(5), || {
            server.zones().daily_reset_count() == 1
        }));
        assert_eq!(server.zones().peak_sessions(), 1);
        assert!(wait_until(Duration::from_secs(5), || {
            server.stats().next_scheduled == Some(60_000_000 + 86_400_000_000)
        }));

        server.shutdown().unwrap();
    }

    #[test]
    fn test_lifecycle_misuse_is_rejected() {
        let mut server = create_server(quiet_config()).unwrap();
        server.start().unwrap();

        assert!(matches!(server.start(), Err(ServerError::Internal(_))));
        assert!(matches!(
            server.add_clock_listener(Arc::new(ActiveZones::new())),
            Err(ServerError::Worker(_))
        ));

        server.shutdown().unwrap();
        // a second shutdown is a no-op
        server.shutdown().unwrap();
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ServerConfig {
            worker_count: 0,
            ..quiet_config()
        };
        assert!(matches!(create_server(config), Err(ServerError::Config(_))));
    }

    #[test]
    fn test_connections_spread_over_least_loaded_workers() {
        let server = create_server(quiet_config()).unwrap();
        let first = server.assign_worker().unwrap();
        let second = server.assign_worker().unwrap();
        assert_ne!(first.worker_name(), second.worker_name());

        drop(first);
        let third = server.assign_worker().unwrap();
        assert_eq!(third.worker_name(), "generic-0");
    }

    #[test]
    fn test_failed_persistence_closes_owning_session() {
        let world = Arc::new(MemoryStore::new("world", Duration::from_secs(1)));
        let stores: Vec<Arc<dyn BackingStore>> = vec![world.clone()];
        let mut server = create_server_with_stores(quiet_config(), stores).unwrap();
        server.start().unwrap();

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let lease = server.assign_worker().unwrap();
        let connection = server
            .connections()
            .add_connection("127.0.0.1:40001".parse().unwrap(), lease, tx, 0);
        // keep the session from idling out while the test runs
        server.connections().touch(connection, u64::MAX / 2);

        let account = EntityId::new();
        assert!(server.connections().bind_entity(connection, account));
        world
            .queue_change_set(ChangeSet::new().update(account, json!({ "gold": 10 })))
            .unwrap();

        assert!(wait_until(Duration::from_secs(5), || !server
            .connections()
            .is_connected(connection)));
        assert_eq!(world.failed_count(), 1);
        server.shutdown().unwrap();
    }

    #[test]
    fn test_internal_disconnect_request() {
        let mut server = create_server(quiet_config()).unwrap();
        server.start().unwrap();

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let lease = server.assign_worker().unwrap();
        let connection = server
            .connections()
            .add_connection("127.0.0.1:40002".parse().unwrap(), lease, tx, 0);
        server.connections().touch(connection, u64::MAX / 2);

        server
            .notify(internal::DISCONNECT, connection.to_le_bytes().to_vec())
            .unwrap();
        assert!(wait_until(Duration::from_secs(5), || !server
            .connections()
            .is_connected(connection)));
        server.shutdown().unwrap();
    }

    #[test]
    fn test_clock_listeners_receive_reported_windows() {
        struct Counter(AtomicUsize);
        impl ClockListener for Counter {
            fn handle_timed_actions(&self, _events: &ClockEvents) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let mut server = create_server(quiet_config()).unwrap();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        server.add_clock_listener(counter.clone()).unwrap();
        server.start().unwrap();

        // an offset change forces the next tick to report a window
        server
            .notify(internal::SET_GAME_OFFSET, 60i64.to_le_bytes().to_vec())
            .unwrap();
        assert!(wait_until(Duration::from_secs(5), || counter
            .0
            .load(Ordering::SeqCst)
            > 0));
        server.shutdown().unwrap();
    }

    #[test]
    fn test_health_reflects_lifecycle() {
        let mut server = create_server(quiet_config()).unwrap();
        server.start().unwrap();
        let thresholds = HealthThresholds {
            max_queue_depth: 10_000,
            max_missed_ticks: u64::MAX,
        };
        assert_eq!(server.health(&thresholds).status, HealthStatus::Healthy);

        server.shutdown().unwrap();
        assert_eq!(server.health(&thresholds).status, HealthStatus::Unhealthy);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_keep_alive_round_trip_over_tcp() {
        let mut server = create_server(ServerConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            enable_network: true,
            ..quiet_config()
        })
        .unwrap();
        server.start().unwrap();
        let addr = server.start_network().await.unwrap().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let frame = encode_frame(commands::KEEP_ALIVE, &[9, 8, 7, 6]).unwrap();
        client.write_all(&frame).await.unwrap();

        let mut decoder = FrameDecoder::new();
        let mut buffer = [0u8; 64];
        let reply = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let read = client.read(&mut buffer).await.unwrap();
                assert!(read > 0, "server closed the connection");
                decoder.push(&buffer[..read]);
                if let Some(frame) = decoder.next_frame().unwrap() {
                    return frame;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(reply, (commands::KEEP_ALIVE, vec![9, 8, 7, 6]));
        assert_eq!(server.connections().connection_count(), 1);

        tokio::task::block_in_place(|| server.shutdown()).unwrap();
        assert_eq!(server.connections().connection_count(), 0);
    }
}

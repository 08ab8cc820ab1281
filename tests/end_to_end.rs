// End-to-end test over real loopback sockets.
//
// Starts a host transport with the reference engine behind a host
// dispatcher, joins two clients, and drives a game start, an out-of-turn
// roll, a legal roll, chat, and host shutdown. Every observation is taken
// from the public event buses, the same way a UI would.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use boardlink::dispatch::{ClientDispatcher, DispatchEvent, DispatchHandle, HostDispatcher, ReplicaEvent};
use boardlink::game::{Command, PlayerId, TableEngine};
use boardlink::{NetConfig, TransportManager};

const WAIT: Duration = Duration::from_secs(5);

type Client = Arc<ClientDispatcher<Arc<TransportManager>>>;

fn loopback_config() -> NetConfig {
    NetConfig {
        bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        ..NetConfig::default()
    }
}

/// Wait for the first event matching `pred`, skipping others.
async fn expect<T, F>(rx: &mut mpsc::UnboundedReceiver<T>, what: &str, mut pred: F) -> T
where
    T: std::fmt::Debug,
    F: FnMut(&T) -> bool,
{
    let found = timeout(WAIT, async {
        while let Some(event) = rx.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await;
    match found {
        Ok(Some(event)) => event,
        Ok(None) => panic!("channel closed while waiting for {what}"),
        Err(_) => panic!("timed out waiting for {what}"),
    }
}

async fn within<F: Future>(fut: F) -> F::Output {
    timeout(WAIT, fut).await.expect("timed out")
}

struct Table {
    host: Arc<TransportManager>,
    host_id: PlayerId,
    handle: DispatchHandle,
    host_events: mpsc::UnboundedReceiver<DispatchEvent>,
    clients: Vec<(PlayerId, Client, mpsc::UnboundedReceiver<ReplicaEvent>, Arc<TransportManager>)>,
}

/// Host with room code `ABC123` plus Alice and Bob, all joined.
async fn seat_table() -> Table {
    let host_id = PlayerId::random();
    let host = TransportManager::new(loopback_config(), host_id, "Host");
    let inbound = host.subscribe();
    let addr = host.start_host(0, Some("ABC123".into())).await.unwrap();

    let dispatcher = HostDispatcher::new(TableEngine::new(42), host.clone(), host_id, "Host", true);
    let handle = dispatcher.handle();
    let mut host_events = handle.subscribe();
    tokio::spawn(dispatcher.run(inbound));

    let mut clients = Vec::new();
    for name in ["Alice", "Bob"] {
        let id = PlayerId::random();
        let transport = TransportManager::new(loopback_config(), id, name);
        let inbound = transport.subscribe();
        let delivery = transport.subscribe_delivery();
        transport
            .connect_to_host("127.0.0.1", addr.port(), name, Some("ABC123".into()))
            .await
            .unwrap();

        let client = Arc::new(ClientDispatcher::new(transport.clone(), id));
        let mut events = client.subscribe();
        let driver = client.clone();
        tokio::spawn(async move { driver.run(inbound, delivery).await });

        let joined = expect(&mut events, "Joined", |e| matches!(e, ReplicaEvent::Joined { .. })).await;
        let ReplicaEvent::Joined { host_id: seen, .. } = joined else { unreachable!() };
        assert_eq!(seen, host_id);
        clients.push((id, client, events, transport));
    }

    expect(&mut host_events, "three-player roster", |e| {
        matches!(e, DispatchEvent::Roster(roster) if roster.len() == 3)
    })
    .await;
    assert_eq!(host.session_count(), 2);

    Table { host, host_id, handle, host_events, clients }
}

#[tokio::test]
async fn full_game_lifecycle() {
    let mut table = seat_table().await;

    // 1. Start: every client gets the first full sync at version 1.
    table.handle.submit(Command::StartGame);
    for (_, client, events, _) in table.clients.iter_mut() {
        expect(events, "first sync", |e| matches!(e, ReplicaEvent::Synced { version: 1, .. })).await;
        let replica = client.replica();
        assert_eq!(replica.snapshot().players.len(), 3);
        assert!(replica.snapshot().current_turn.is_some());
    }
    let holder = table.clients[0].1.replica().snapshot().current_turn.unwrap();
    assert_eq!(table.clients[1].1.replica().snapshot().current_turn, Some(holder));

    // 2. Out-of-turn roll is refused and changes nothing.
    let idle = table.clients.iter().position(|(id, ..)| *id != holder).unwrap();
    {
        let (_, client, events, _) = &mut table.clients[idle];
        client.send_command(&Command::RollDice);
        let refused = expect(events, "NACK", |e| matches!(e, ReplicaEvent::Refused { .. })).await;
        let ReplicaEvent::Refused { reason, .. } = refused else { unreachable!() };
        assert_eq!(reason, "not your turn");
        assert_eq!(client.replica().version(), 1);
    }

    // 3. The holder rolls; both replicas see the same move.
    match table.clients.iter().find(|(id, ..)| *id == holder) {
        Some((_, client, ..)) => {
            client.send_command(&Command::RollDice);
        }
        None => {
            assert_eq!(holder, table.host_id);
            table.handle.submit(Command::RollDice);
        }
    }
    expect(&mut table.host_events, "applied roll", |e| {
        matches!(e, DispatchEvent::Applied { version: 2, .. })
    })
    .await;
    for (_, _, events, _) in table.clients.iter_mut() {
        expect(events, "MOVE", |e| {
            matches!(e, ReplicaEvent::Updated { kind: boardlink::MessageType::Move, .. })
        })
        .await;
    }
    let a = table.clients[0].1.replica().position_of(&holder);
    let b = table.clients[1].1.replica().position_of(&holder);
    assert!(a.is_some_and(|p| p > 0));
    assert_eq!(a, b);

    // 4. Chat from a client reaches the other client through the host.
    table.clients[0].1.send_chat("good luck");
    let (_, _, bob_events, _) = &mut table.clients[1];
    let chat = expect(bob_events, "chat", |e| matches!(e, ReplicaEvent::Chat { .. })).await;
    let ReplicaEvent::Chat { line, .. } = chat else { unreachable!() };
    assert_eq!(line.from_name, "Alice");
    assert_eq!(line.text, "good luck");

    // 5. Host shutdown reaches every client.
    table.host.stop();
    for (_, _, events, transport) in table.clients.iter_mut() {
        expect(events, "HostLost", |e| matches!(e, ReplicaEvent::HostLost(_))).await;
        within(async {
            while transport.tracker().pending_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
    }
}

#[tokio::test]
async fn wrong_room_code_is_refused() {
    let host_id = PlayerId::random();
    let host = TransportManager::new(loopback_config(), host_id, "Host");
    let addr = host.start_host(0, Some("ABC123".into())).await.unwrap();

    let intruder = TransportManager::new(loopback_config(), PlayerId::random(), "Mallory");
    let mut events = intruder.subscribe();
    intruder
        .connect_to_host("127.0.0.1", addr.port(), "Mallory", Some("XYZ999".into()))
        .await
        .unwrap();

    let lost = expect(&mut events, "HostLost", |e| {
        matches!(e, boardlink::TransportEvent::HostLost { .. })
    })
    .await;
    let boardlink::TransportEvent::HostLost { reason } = lost else { unreachable!() };
    assert_eq!(reason, "invalid room code");
    assert_eq!(host.session_count(), 0);
    host.stop();
}

//! Performance benchmarks for the hot paths of a room session

use bincode::{deserialize, serialize};
use client::status::derive_status;
use serde_json::json;
use shared::store::{get_at, set_at};
use shared::{encode_value, ChessRules, MemoryStore, Packet, Room, RulesAdapter, Side, Store};
use std::time::Instant;

const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

fn sample_room() -> serde_json::Value {
    json!({
        "createdAt": 1_700_000_000_000u64,
        "players": {
            "white": {"id": "p1", "name": "Ada"},
            "black": {"id": "p2", "name": "Bo"}
        },
        "game": {
            "position": START,
            "mover": "white",
            "history": ["e4", "e5", "Nf3", "Nc6"]
        },
        "rematch": {"white": false, "black": false}
    })
}

/// Benchmarks status derivation, which runs on every push
#[test]
fn benchmark_status_derivation() {
    let rules = ChessRules::new();
    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = derive_status(&rules, START, true).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Status derivation: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks legal destination lookup for a selected piece
#[test]
fn benchmark_legal_destinations() {
    let rules = ChessRules::new();
    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let destinations = rules.legal_destinations(START, "g1", Side::White).unwrap();
        assert_eq!(destinations.len(), 2);
    }

    let duration = start.elapsed();
    println!(
        "Legal destinations: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}

/// Benchmarks decoding a pushed room record
#[test]
fn benchmark_room_decoding() {
    let value = sample_room();
    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let room = Room::from_value(value.clone()).unwrap();
        assert!(room.players.both_filled());
    }

    let duration = start.elapsed();
    println!(
        "Room decoding: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}

/// Benchmarks path edits on the JSON tree
#[test]
fn benchmark_tree_path_edits() {
    let iterations = 10_000;
    let mut root = json!({"rooms": {"ABC": sample_room()}});
    let start = Instant::now();

    for i in 0..iterations {
        let vote = i % 2 == 0;
        set_at(&mut root, "rooms/ABC/rematch/white", Some(json!(vote)));
        assert_eq!(
            get_at(&root, "rooms/ABC/rematch/white"),
            Some(&json!(vote))
        );
    }

    let duration = start.elapsed();
    println!(
        "Tree path edits: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}

/// Benchmarks encoding of the largest regular packet, a full room push
#[test]
fn benchmark_packet_serialization() {
    let value = sample_room();
    let iterations = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        let packet = Packet::Changed {
            subscription_id: 1,
            revision: i,
            value: encode_value(Some(&value)).unwrap(),
        };
        let data = serialize(&packet).unwrap();
        let _: Packet = deserialize(&data).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Packet serialization: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}

/// Stress test: many subscribers on one room while it is written repeatedly
#[tokio::test]
async fn stress_test_many_subscribers() {
    let store = MemoryStore::new();
    store
        .write("rooms/ABC", Some(sample_room()))
        .await
        .unwrap();

    let mut subscriptions = Vec::new();
    for _ in 0..100 {
        subscriptions.push(store.subscribe("rooms/ABC").await.unwrap());
    }

    let writes = 100;
    let start = Instant::now();
    for i in 0..writes {
        store
            .write("rooms/ABC/game/position", Some(json!(format!("pos-{}", i))))
            .await
            .unwrap();
    }
    let duration = start.elapsed();

    for subscription in &mut subscriptions {
        let mut pushes = 0;
        while subscription.try_recv().is_some() {
            pushes += 1;
        }
        // initial value plus one per write
        assert_eq!(pushes, writes + 1);
    }

    println!(
        "Fan-out: {} writes to {} subscribers in {:?}",
        writes,
        subscriptions.len(),
        duration
    );
    assert!(duration.as_millis() < 2000);
}

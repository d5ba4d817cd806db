//! Performance benchmarks for critical game systems

use client::interpolation::SnapshotBuffer;
use client::prediction::{PendingInput, PendingInputs};
use client::reconciliation::reconcile;
use server::spsc;
use shared::protocol::{decode, encode, AllPlayersPayload, Packet, Payload, PlayerEntry};
use shared::{
    integrate_move, Direction, MovementCommand, PlayerState, World, MAX_PLAYERS,
    PENDING_INPUT_CAPACITY, PLAYER_SPEED,
};
use std::time::{Duration, Instant};

/// Benchmarks movement integration against the standard map
#[test]
fn benchmark_integrate_move() {
    let world = World::standard();
    let command = MovementCommand::new(Direction::Right, PLAYER_SPEED, 1.0 / 60.0);

    let iterations = 100_000;
    let start = Instant::now();

    let mut state = PlayerState::new(10.0, 300.0);
    for i in 0..iterations {
        state = integrate_move(&world, state, &command);
        if i % 100 == 0 {
            state = PlayerState::new(10.0, 300.0);
        }
    }

    let duration = start.elapsed();
    println!(
        "Movement integration: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}

/// Benchmarks encoding and decoding a full broadcast
#[test]
fn benchmark_broadcast_codec() {
    let players = (0..MAX_PLAYERS as u32)
        .map(|id| PlayerEntry {
            session_id: id,
            x: id as f32 * 10.0,
            y: id as f32 * 5.0,
        })
        .collect();
    let packet = Packet::new(1, 1, 1, Payload::AllPlayersState(AllPlayersPayload::new(players)));

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = encode(&packet).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.header.payload_len as usize, bytes.len() - 16);
    }

    let duration = start.elapsed();
    println!(
        "Broadcast codec: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 2);
}

/// Benchmarks reconciliation with a full pending-input history
#[test]
fn benchmark_reconciliation_replay() {
    let world = World::standard();
    let mut template = PendingInputs::new(PENDING_INPUT_CAPACITY);
    for sequence in 1..PENDING_INPUT_CAPACITY as u32 {
        let direction = if sequence % 2 == 0 {
            Direction::Down
        } else {
            Direction::Right
        };
        template.push(PendingInput {
            sequence,
            command: MovementCommand::new(direction, PLAYER_SPEED, 1.0 / 120.0),
        });
    }

    let iterations = 2_000;
    let start = Instant::now();

    for i in 0..iterations {
        let mut pending = template.clone();
        let _ = reconcile(&world, PlayerState::new(5.0, 5.0), (i % 10) as u32, &mut pending);
    }

    let duration = start.elapsed();
    println!(
        "Reconciliation: {} replays of {} inputs in {:?}",
        iterations,
        template.len(),
        duration
    );

    assert!(duration.as_secs() < 2);
}

/// Benchmarks snapshot sampling at render rate
#[test]
fn benchmark_snapshot_sampling() {
    let origin = Instant::now();
    let mut buffer = SnapshotBuffer::new(64);
    for i in 0..64u64 {
        buffer.push(
            PlayerState::new(i as f32, 0.0),
            origin + Duration::from_millis(i * 16),
        );
    }

    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let at = origin + Duration::from_micros((i % 1_000) as u64 * 1_000);
        let _ = buffer.sample(at);
    }

    let duration = start.elapsed();
    println!(
        "Snapshot sampling: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}

/// Benchmarks cross-thread throughput of the persistence ring
#[test]
fn benchmark_spsc_throughput() {
    let (mut producer, mut consumer) = spsc::channel::<u64>(1024);
    let total = 200_000u64;

    let start = Instant::now();
    let reader = std::thread::spawn(move || {
        let mut received = 0;
        while received < total {
            match consumer.pop() {
                Some(value) => {
                    assert_eq!(value, received);
                    received += 1;
                }
                None => std::thread::yield_now(),
            }
        }
    });

    let mut next = 0;
    while next < total {
        match producer.push(next) {
            Ok(()) => next += 1,
            Err(_) => std::thread::yield_now(),
        }
    }
    reader.join().unwrap();

    let duration = start.elapsed();
    println!("SPSC ring: {} values in {:?}", total, duration);

    assert!(duration.as_secs() < 5);
}

#![allow(dead_code)]

use std::sync::Arc;

use neurotrace::config::EngineConfig;
use neurotrace::edit::EditEngine;
use neurotrace::events::EventQueue;
use neurotrace::path::{DenseVolume, PathOptions};
use neurotrace::types::{NeuronId, NodeId, Position};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn p(x: f64, y: f64, z: f64) -> Position {
    Position::new(x, y, z)
}

pub fn straight_config(client: u16) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.session.client_id = client;
    config.path = PathOptions::straight();
    config
}

pub fn engine(config: &EngineConfig) -> (EditEngine, EventQueue) {
    init_tracing();
    let events = EventQueue::new();
    (EditEngine::new(config, Arc::new(events.clone())), events)
}

/// A volume the straight-line mode never samples.
pub fn blank() -> DenseVolume {
    DenseVolume::new([1, 1, 1], Position::ORIGIN, p(1.0, 1.0, 1.0))
}

/// Dark background with a bright process along x at `y = z = 4`.
pub fn tube(len: usize) -> DenseVolume {
    DenseVolume::from_fn([len, 9, 9], Position::ORIGIN, p(1.0, 1.0, 1.0), |_, j, k| {
        let (dy, dz) = (j as i64 - 4, k as i64 - 4);
        if dy * dy + dz * dz <= 2 {
            0.9
        } else {
            0.05
        }
    })
}

/// Seeded speckle volume.
pub fn speckle(seed: u64, dims: [usize; 3]) -> DenseVolume {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut volume = DenseVolume::new(dims, Position::ORIGIN, p(1.0, 1.0, 1.0));
    for k in 0..dims[2] {
        for j in 0..dims[1] {
            for i in 0..dims[0] {
                volume.set(i, j, k, rng.gen_range(0.0..1.0));
            }
        }
    }
    volume
}

/// Starts a neuron at `points[0]` and extends through the remaining points.
pub fn trace(engine: &mut EditEngine, points: &[Position]) -> (NeuronId, Vec<NodeId>) {
    let volume = blank();
    engine.pick_target(points[0]);
    let (neuron, root) = engine.create_neuron().unwrap();
    let mut nodes = vec![root];
    for &at in &points[1..] {
        engine.pick_target(at);
        assert!(engine.connect(&volume).unwrap().is_found());
        nodes.push(engine.extend(&volume).unwrap());
    }
    (neuron, nodes)
}

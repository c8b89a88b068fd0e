//! Neurotrace: the tracing graph engine behind collaborative neuron skeleton
//! reconstruction.
//!
//! The crate keeps a forest of traced neurons in memory and edits it through
//! validated, invertible transactions:
//!
//! - [`storage`] holds nodes, edges and neurons and enforces the tree rules.
//! - [`path`] computes putative paths through an intensity volume.
//! - [`edit`] turns operator actions into transactions with undo and redo.
//! - [`sync`] exchanges transactions with a versioned repository.
//! - [`events`] carries ordered change notifications to presentation.
//!
//! ```
//! use std::sync::Arc;
//! use neurotrace::config::EngineConfig;
//! use neurotrace::edit::EditEngine;
//! use neurotrace::events::EventQueue;
//! use neurotrace::path::{DenseVolume, PathOptions};
//! use neurotrace::types::Position;
//!
//! let mut config = EngineConfig::default();
//! config.path = PathOptions::straight();
//! let mut engine = EditEngine::new(&config, Arc::new(EventQueue::new()));
//! let volume = DenseVolume::new([1, 1, 1], Position::ORIGIN, Position::new(1.0, 1.0, 1.0));
//!
//! engine.pick_target(Position::ORIGIN);
//! let (neuron, _) = engine.create_neuron().unwrap();
//! engine.pick_target(Position::new(10.0, 0.0, 0.0));
//! assert!(engine.connect(&volume).unwrap().is_found());
//! engine.extend(&volume).unwrap();
//! assert_eq!(engine.store().try_neuron(neuron).unwrap().nodes.len(), 2);
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod edit;
pub mod error;
pub mod events;
pub mod path;
pub mod spatial;
pub mod storage;
pub mod sync;
pub mod types;

pub use edit::{Anchor, EditEngine, Focus};
pub use error::{Result, TraceError};
pub use storage::{GraphStore, Transaction};

//! A multi-signal skip-gram embedding trainer: one shared parameter store
//! (users, items, words, and per-task outputs) trained by Hogwild-style
//! asynchronous SGD across transactions, views, subscriptions, searches,
//! and descriptive item/user word context.
//!
//! `scheduler::Scheduler` is the entry point for running a training job;
//! `data_loader::load` builds its inputs from the on-disk file formats, and
//! `persistence` saves/loads/exports the result.

pub mod cli;
pub mod config;
pub mod data_loader;
pub mod error;
pub mod kernels;
pub mod matrix;
pub mod params;
pub mod persistence;
pub mod sampler;
pub mod scheduler;
pub mod streams;
pub mod tables;

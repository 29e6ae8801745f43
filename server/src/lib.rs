//! Core of a peer-to-peer ticket resale marketplace.
//!
//! Tickets are spread across per-category shard tables. The catalog routes
//! category names to shards and finds tickets by id alone, purchases move
//! ownership with one guarded row update, and per-scope snapshots are
//! refreshed under a cooldown. [`routes::create_routes`] exposes all of it
//! over HTTP.

pub mod backend;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod handlers;
pub mod identity;
pub mod models;
pub mod purchase;
pub mod refresh;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod utils;

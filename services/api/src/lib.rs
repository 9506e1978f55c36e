//! Chorus API Library Crate
//!
//! Everything the `api` binary serves: configuration, the JSON-RPC and REST
//! surfaces over the task manager, the WebSocket voice transport, and the
//! collaborator adapters. The binary itself is a thin wrapper around
//! [`router::create_router`].

pub mod audio_utils;
pub mod config;
pub mod handlers;
pub mod models;
pub mod providers;
pub mod router;
pub mod rpc;
pub mod state;
pub mod ws;

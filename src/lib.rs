//! Streaming HLS reverse proxy.
//!
//! Fetches playlists and media from an upstream on behalf of a player and
//! streams them back. Playlists are rewritten on the fly so relative segment,
//! key and variant references resolve against the upstream (and by default
//! route back through the proxy).

pub mod config;
pub mod error;
pub mod hls;
pub mod metrics;
pub mod server;

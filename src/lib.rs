// Skybridge: Bluesky event bridge and live-status sync for streamers
//
// This is the library root. Each module corresponds to one subsystem:
// the Bluesky client layer, event normalization, live-status sync and the
// integration that ties them together.

pub mod actions;
pub mod bluesky;
pub mod config;
pub mod events;
pub mod facets;
pub mod integration;
pub mod live;
pub mod output;
pub mod sink;
pub mod status;

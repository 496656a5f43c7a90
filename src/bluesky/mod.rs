// Bluesky account access — XRPC client, notification feed, records, posting.
//
// Built on reqwest and atrium-api. Each submodule handles one area of
// the Bluesky API surface.

pub mod client;
pub mod notifications;
pub mod posting;
pub mod posts;
pub mod records;
pub mod types;

// Live-status sync — mirror "streaming now" onto the Bluesky profile.
//
// A `LiveSignalSource` answers "is the streamer live?"; `LiveStatusSync`
// polls it and writes or clears the account's status record to match.

pub mod signal;
pub mod sync;
pub mod twitch;

// Instawatch: Instagram post and story notifications for Discord
//
// This is the library root. Each module corresponds to a major subsystem
// of the polling pipeline.

pub mod clock;
pub mod commands;
pub mod config;
pub mod db;
pub mod instagram;
pub mod notify;
pub mod output;
pub mod pipeline;
pub mod status;
pub mod tracking;

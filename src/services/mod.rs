pub mod delivery;
pub mod profile_builder;
pub mod realtime;
pub mod scoring;

pub mod analysis;
pub mod catalog;
pub mod config;
pub mod decoder;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod poller;
pub mod storage;
pub mod submitter;
#[cfg(test)]
mod testing;
pub mod transform;
pub mod trigger;

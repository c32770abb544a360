pub mod channel;
pub mod chunker;
pub mod composer;
pub mod config;
pub mod database;
pub mod decision;
pub mod events;
pub mod generator;
pub mod http_client;
pub mod llm_client;
pub mod model;
pub mod pipeline;
pub mod poller;
pub mod recorder;
pub mod runtime;
pub mod store;
pub mod telegram;
pub mod templates;
pub mod turn;

#[cfg(test)]
mod testing;

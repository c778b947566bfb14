// drive a live page over the devtools protocol, one action at a time or from a reasoning engine

pub mod action;
pub mod agent;
pub mod api;
pub mod cdp;
pub mod chrome;
pub mod config;
pub mod coords;
pub mod executor;
pub mod input;
pub mod keys;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod translate;

#[cfg(test)]
mod testing;

pub mod api;
pub mod backend;
pub mod config;
pub mod humanize;
pub mod job;
pub mod ledger;
pub mod observability;
pub mod orchestrator;
pub mod queue;
pub mod storage;
pub mod worker;

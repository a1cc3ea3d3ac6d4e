pub mod app;
pub mod commands;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod output;
pub mod queue;
pub mod record;
pub mod run;
pub mod runlist;
pub mod runtime;
pub mod scan;
pub mod session;

pub mod attachments;
pub mod audit;
pub mod config;
pub mod date_range;
pub mod document;
pub mod exporter;
pub mod keys;
pub mod lock;
pub mod model;
pub mod naming;
pub mod paths;
pub mod planner;
pub mod retry;
pub mod session;
pub mod state;
pub mod util;
pub mod warn;

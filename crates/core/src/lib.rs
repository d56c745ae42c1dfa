//! Classification and layout rewriting for ColorOS launcher backups.

pub mod classifier;
pub mod config;
pub mod error;
pub mod extractor;
pub mod launcher_db;
pub mod layout_xml;
pub mod models;
pub mod mutator;
pub mod packaging;
pub mod pipeline;
pub mod planner;
pub mod resolver;
pub mod restore;
pub mod retry;
pub mod snapshot;
pub mod transport;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub mod bootstrap;
pub mod collaborators;
pub mod config;
pub mod database;
pub mod error;
pub mod importer;
pub mod index;
pub mod node;
pub mod profiles;
pub mod repair;
pub mod shares;
pub mod subscriptions;
pub mod telemetry;
pub mod utils;
pub mod visibility;

pub mod backend;
pub mod bootstrap;
pub mod http;
pub mod identity;
pub mod job;
pub mod manager;
pub mod reconcile;
pub mod registry;
pub mod spec;
pub mod submit;
pub mod tenant;

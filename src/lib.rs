pub mod acl;
pub mod config;
pub mod engine;
pub mod executable;
pub mod identifier;
pub mod model;
pub mod object_type;
pub mod observability;
pub mod participant;
pub mod reaper;
pub mod specification;
pub mod wal;

pub mod bootstrap;
pub mod cms;
pub mod config;
pub mod graph;
pub mod locales;
pub mod passthrough;
pub mod routes;
pub mod schema;

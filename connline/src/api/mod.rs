pub mod connline;
pub mod models;

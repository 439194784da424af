pub mod client;
pub mod links;

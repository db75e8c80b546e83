pub mod agent;
pub mod assembly;
pub mod aws;
pub mod chat;
pub mod credentials;
pub mod errors;
pub mod models;
pub mod prompt_template;
pub mod providers;
pub mod tools;

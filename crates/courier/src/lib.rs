pub mod artifacts;
pub mod catalog;
pub mod discovery;
pub mod dispatcher;
pub mod envelope;
pub mod errors;
pub mod models;
pub mod prompt;
pub mod prompt_template;
pub mod providers;
pub mod tracker;

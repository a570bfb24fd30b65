pub mod transcript;
pub mod webhook;

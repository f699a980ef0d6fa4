pub mod error;
pub mod handler_utils;
pub mod images;
pub mod server;

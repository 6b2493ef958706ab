pub mod config;
pub mod error;
pub mod game;
pub mod models;
pub mod routes;
pub mod session;
pub mod websocket;

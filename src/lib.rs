pub mod auth;
pub mod db;
pub mod error;
pub mod message;
pub mod middleware;
pub mod presence;
pub mod relay;
pub mod routes;
pub mod state;
pub mod websocket;

pub mod monitor_routes;
mod monitor_websocket;

pub use monitor_routes::routes;

//! WebSocket endpoints: the client channel at `/ws` and the dashboard
//! observability channel at `/ws/dashboard`.

pub mod client;
pub mod dashboard;

mod api;

pub use api::{AliveResponse, GreeterResponse, InfoResponse, ReadyResponse, humanize_uptime};

mod common;
mod greeter;
mod prom;

pub use common::{alive, info, ready};
pub use greeter::{GreeterParams, greeter};
pub use prom::scrape;

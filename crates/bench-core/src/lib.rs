pub mod config;
pub mod dispatcher;
pub mod fetcher;
pub mod invoker;
pub mod params;
pub mod pipeline;
pub mod rate_source;
pub mod runner;
pub mod segment;
pub mod stats;
pub mod store;
pub mod target;
pub mod window;

pub use config::*;
pub use dispatcher::*;
pub use fetcher::*;
pub use invoker::*;
pub use params::*;
pub use pipeline::*;
pub use rate_source::*;
pub use runner::*;
pub use segment::*;
pub use stats::*;
pub use store::*;
pub use target::*;
pub use window::*;

//! Panorama acquisition: coverage lookup, neighbor selection, signed tile
//! fetching and stitching, and the per-round state the viewer reads from.

pub mod capability;
pub mod config;
pub mod coverage;
pub mod imagery;
pub mod loader;
pub mod record;
pub mod resolver;
pub mod round;
pub mod services;

use std::future::Future;
use std::pin::Pin;

pub use capability::*;
pub use config::*;
pub use coverage::*;
pub use imagery::*;
pub use loader::*;
pub use record::*;
pub use resolver::*;
pub use round::*;
pub use services::*;

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

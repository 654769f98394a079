//! Street-level viewer integration: the host contract, the panorama
//! descriptor handed to it, and the adapter that feeds it imagery.

pub mod adapter;
pub mod descriptor;
pub mod host;

pub use adapter::*;
pub use descriptor::*;
pub use host::*;

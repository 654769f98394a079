pub mod geodesy;
pub mod tiles;

pub use geodesy::*;
pub use tiles::*;

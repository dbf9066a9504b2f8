//! Built-in consumers

pub mod csv_writer;
pub mod plotter;
pub mod stream;

pub use csv_writer::*;
pub use plotter::*;
pub use stream::*;

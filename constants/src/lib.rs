pub mod compute;
pub mod io;
pub mod processing;

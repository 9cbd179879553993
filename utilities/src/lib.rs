pub mod cancel;
pub mod line_io;

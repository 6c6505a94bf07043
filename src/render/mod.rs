pub mod canvas;
pub mod geometry;
pub mod spectrum;
pub mod term;

mod fixed_grid;

pub use fixed_grid::*;

pub mod check;
pub mod clusters;
pub mod probe;
pub mod switch;

pub mod jobs;
pub mod predict;
pub mod results;

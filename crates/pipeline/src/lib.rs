//! Detection pipeline: model registry, frame pipes, overlay drawing and
//! HLS packaging.

pub mod config;
pub mod detector;
pub mod error;
pub mod frames;
pub mod images;
pub mod overlay;
pub mod packager;
pub mod processor;
pub mod registry;

pub mod image_asset;

pub use image_asset::*;

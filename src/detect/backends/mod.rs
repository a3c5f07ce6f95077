pub mod motion_shape;
pub mod texture;

#[cfg(feature = "backend-opencv")]
pub mod opencv_motion;

pub use motion_shape::MotionShapeStrategy;
pub use texture::TextureStrategy;

#[cfg(feature = "backend-opencv")]
pub use opencv_motion::OpencvMotionStrategy;

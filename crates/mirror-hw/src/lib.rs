//! mirror-hw: Camera capture for the smart mirror.
//!
//! Provides a V4L2 frame source, the grayscale frame type the
//! recognition loop consumes, and the bridge to the external embedder.

pub mod camera;
pub mod embedder;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, PixelFormat};
pub use embedder::{embed_image, single_face, EmbedderError, ProcessEmbedder};
pub use frame::{Frame, FrameError};

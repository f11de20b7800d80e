//! Frame handling and the wavelet focus metric
//!
//! The camera task publishes frames into a shared single-slot handle; the
//! focus worker reads the newest one and scores its sharpness with a
//! multi-resolution wavelet metric. Nothing here touches the network.

mod frame;
mod wavelet;

pub use frame::*;
pub use wavelet::*;

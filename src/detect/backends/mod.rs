pub mod asset;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use asset::AssetDetectorFactory;
pub use stub::{StubBackend, StubFactory};

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

pub mod region;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use region::RegionGrowBackend;
pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

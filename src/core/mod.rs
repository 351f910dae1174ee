pub mod archive;
pub mod classifier;
pub mod download;
pub mod error;
pub mod extractor;
pub mod protocol;
pub mod scripts;
pub mod stabilize;
pub mod surface;
pub mod transfer;

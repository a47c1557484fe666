//! Transport unit sources

pub mod reader;
pub mod replay;
pub mod socket;

pub use reader::FrameReader;
pub use replay::ReplaySource;
pub use socket::SocketSource;

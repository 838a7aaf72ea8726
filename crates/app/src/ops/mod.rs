pub mod download;
pub mod init;
pub mod logout;
pub mod status;
pub mod upload;
pub mod version;

pub use download::Download;
pub use init::Init;
pub use logout::Logout;
pub use status::Status;
pub use upload::Upload;
pub use version::Version;

pub mod case_status;
pub mod close_session;
pub mod download;
pub mod init;
pub mod reconcile;
pub mod version;

pub use case_status::CaseStatus;
pub use close_session::CloseSession;
pub use download::Download;
pub use init::Init;
pub use reconcile::Reconcile;
pub use version::Version;

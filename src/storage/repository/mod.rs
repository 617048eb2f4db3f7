pub mod artifact_repo;
pub mod link_repo;
pub mod session_repo;

pub use artifact_repo::ArtifactRepository;
pub use link_repo::LinkRepository;
pub use session_repo::SessionRepository;

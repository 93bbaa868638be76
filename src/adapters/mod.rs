// Adapters layer: concrete implementations of the collaborator ports (host probe, compose, files).

pub mod compose;
pub mod probe;
pub mod storage;

pub use compose::ComposeLifecycle;
pub use probe::SocketProbe;
pub use storage::LocalStorage;

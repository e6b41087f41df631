//! Errors surfaced by the server's ambient shell (listener bind, serve loop).
//! Translation and upstream errors live in `pipeline::error` instead; this
//! crate only wraps the concerns it owns itself.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to bind to address: {0}")]
    Bind(#[source] std::io::Error),

    #[error("server error: {0}")]
    Server(#[source] std::io::Error),
}

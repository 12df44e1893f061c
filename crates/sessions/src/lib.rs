//! In-memory session management: the keyed session store, per-session
//! conversation and audio state, and the idle-expiry sweep.

pub mod lifecycle;
pub mod store;

pub use lifecycle::spawn_expiry_sweep;
pub use store::{RecognitionHandle, Session, SessionStore};

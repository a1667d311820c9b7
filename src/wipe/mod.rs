//! Secure erase engine: overwrite passes, name shredding, session hygiene.

pub mod eraser;
pub mod patterns;
pub mod session;

pub use eraser::Eraser;
pub use patterns::{Pass, WipeMethod, DEFAULT_RANDOM_PASSES};
pub use session::{
    clean_current_session, clean_previous_sessions, previous_session_cache_exists, SessionGuard,
};

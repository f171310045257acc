pub mod classify;
pub mod detect;

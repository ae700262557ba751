//! In-process service sessions.

pub mod chanserv;

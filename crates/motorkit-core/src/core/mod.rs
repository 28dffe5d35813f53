//! Core runtime plumbing shared by the link and the presentation layer.

pub mod event;

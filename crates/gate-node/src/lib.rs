//! The Gatewarden edge node: a single process that watches a camera,
//! identifies people and drives a physical gate, staying useful when the
//! network is gone.
//!
//! Thread layout (all plain OS threads with bounded channel hand-offs):
//! capture fills the frame buffers, the main loop runs detection /
//! quality / tracking and dispatches recognition jobs, two workers run
//! alignment + embedding + index search, a sync worker talks to the
//! backend, the UI thread renders at 30 fps, and the stream thread feeds
//! the admin transport.

pub mod access_log;
pub mod alarm;
pub mod alert;
pub mod capture;
pub mod config;
pub mod decision;
pub mod gate;
pub mod node;
pub mod recognition;
pub mod render;
pub mod stream;
pub mod sync;
pub mod tracker;
pub mod ui;

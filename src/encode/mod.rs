//! Encoder backends and the sinks they write to.
//!
//! Every backend consumes [`StreamingFrame`](crate::StreamingFrame)s in strictly increasing
//! index order and produces a [`FinalBlob`](backend::FinalBlob).

pub(crate) mod backend;
pub(crate) mod ffmpeg;
pub(crate) mod hardware;
pub(crate) mod realtime;
pub(crate) mod sequence;
pub(crate) mod sink;
pub(crate) mod targets;

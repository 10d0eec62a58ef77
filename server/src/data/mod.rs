//! Data layer: persistence of topic identity

pub mod recorder;

pub use recorder::{Recorder, RecorderError, topic_id_from_key, topic_key};

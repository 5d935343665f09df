//! Generated protobuf types for the protobuf-binary feed format (spec
//! §4.1.2). See `proto/feed_event.proto` and `build.rs`.

include!(concat!(env!("OUT_DIR"), "/ssb_feed_core.rs"));

fn main() {
    prost_build::compile_protos(&["proto/feed_event.proto"], &["proto"])
        .expect("failed to compile protobuf feed event schema");
}

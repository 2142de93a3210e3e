//! Generated from `proto/membership.proto` by `tonic-build` (see `build.rs`).
//! The `Order::command` and `Message::payload` oneofs are the tagged unions
//! named in the data model; everything downstream matches on them exhaustively.

tonic::include_proto!("formance.agent.membership.v1");

//! Generated gRPC bindings for the conductor service

#![allow(missing_docs)]

tonic::include_proto!("conductor");

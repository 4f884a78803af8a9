//! VMess-over-gRPC transport (C8), layered on top of the same
//! authenticated tunnel used by the raw TCP listener.

mod grpc;

pub use grpc::serve;

//! Protocol Buffer definitions and generated code for the coordination
//! store RPC surface, compiled by `tonic-build` from `proto/coordination.proto`.

pub mod coordination {
    tonic::include_proto!("coordination");
}

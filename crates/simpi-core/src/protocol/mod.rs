//! The SimPi text transfer protocol: frames, protocol profiles and the two
//! wire dialects.

pub mod codec;
pub mod frame;

pub use codec::{decode_lines, decode_slash, encode_line, encode_slash, request_path, Dialect, ProtocolError};
pub use frame::{Command, ProtocolProfile, SuccessToken, TransferFrame, FAILURE_PREFIX};

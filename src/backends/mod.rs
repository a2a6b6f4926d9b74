//! The built-in backends.
//!
//! `memory` and `os` are self-contained; the object-store and transport
//! backends are thin drivers plugged into the shared machinery under
//! [`remote`].

pub mod azure;
pub mod ftp;
pub mod gcs;
pub mod memory;
pub mod os;
pub mod remote;
pub mod s3;
pub mod sftp;

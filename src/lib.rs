//! unifs — a pluggable virtual filesystem.
//!
//! One stream-oriented file/location API over heterogeneous stores:
//! the local disk, S3, Google Cloud Storage, Azure Blob, SFTP, FTP and
//! an in-memory reference backend. Backends register under their URI
//! scheme and any URI resolves to the most specific one.
//!
//! ```no_run
//! # async fn demo() -> unifs::Result<()> {
//! use unifs::File as _;
//!
//! unifs::register_defaults();
//!
//! let mut f = unifs::file_from_uri("mem://scratch/notes.txt")?;
//! f.write(b"hello").await?;
//! f.close().await?;
//!
//! let dst = unifs::location_from_uri("s3://my-bucket/backups/")?;
//! f.copy_to_location(dst.as_ref()).await?;
//! # Ok(())
//! # }
//! ```

pub mod authority;
pub mod backend;
pub mod backends;
pub mod copy;
pub mod errors;
pub mod options;
pub mod paths;
pub mod registry;
pub mod uri;

pub use authority::Authority;
pub use backend::{File, FileSystem, Location, Retry};
pub use errors::{Op, Result, VfsError};
pub use options::{DeleteOption, FileOption, LocationOption, RetryConfig};
pub use registry::register_defaults;
pub use uri::{entity_from_uri, file_from_uri, location_from_uri, Entity};

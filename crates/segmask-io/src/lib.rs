//! segmask-io: Remote inference transport and the segmentation session.
//!
//! Wraps the sans-IO `segmask-pipeline` with everything that waits:
//! authenticated HTTP requests to the hosted enhancement and segmentation
//! models, off-thread image decoding, the busy-flagged [`Session`] with
//! its local fallback chain, and PNG export.

pub mod client;
pub mod export;
pub mod session;
pub mod transport;

pub use client::{Endpoints, RemoteClient};
pub use export::{CUTOUT_FILE_NAME, Export, RESULT_FILE_NAME};
pub use session::{Rendered, ResultSource, Session, SessionError, TaskMode};
pub use transport::{HttpTransport, Transport, TransportError, TransportReply, TransportRequest};

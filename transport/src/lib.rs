//! Interface definitions for weft transport sessions.
//!
//! This crate defines the boundary between the weft engine and the
//! URL-loading stack that actually moves bytes. A transport implementation
//! provides a [`TransportConnector`] that opens one shared
//! [`TransportSession`]; the session mints [`TransportTask`]s and reports
//! everything that happens to them through the single [`SessionDelegate`]
//! handed over at open time.
//!
//! Callbacks may be delivered on any thread the transport owns. The only
//! ordering a transport must guarantee is that events for a *single* task
//! arrive in the order they occurred; no cross-task ordering is promised.

#![deny(missing_docs)]

mod delegate;
mod error;
mod request;
mod response;
mod session;
mod task;

pub use delegate::{SessionDelegate, TaskEvent};
pub use error::{Error, Result};
pub use request::{Method, TransportRequest, UploadPayload};
pub use response::{ResponseHead, ServerTrust, TaskMetrics, TrustDisposition};
pub use session::{SessionOptions, TransportConnector, TransportSession};
pub use task::{BodyStream, ResumeDataHandler, TaskId, TransportTask};

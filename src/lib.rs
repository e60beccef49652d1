//! HTTP client engine multiplexing many requests over one shared transport
//! session.
//!
//! ## Overview
//!
//! A single [`TransportSession`](weft_transport::TransportSession) delivers
//! asynchronous, interleaved, any-thread callbacks for *all* in-flight
//! operations. weft sits between that firehose and many independently-owned
//! request handles, each with its own state machine, progress stream and
//! completion pipeline:
//!
//! - the [`RequestEngine`] mints transport tasks and hands out
//!   [`DataRequest`]/[`DownloadRequest`]/[`UploadRequest`]/
//!   [`StreamingDownloadRequest`] handles;
//! - an internal multiplexer receives every session callback and routes it
//!   by task id to the owning request's delegate;
//! - each delegate accumulates bytes, tracks progress and captures resume
//!   state, then releases the request's held completion pipeline exactly
//!   once on the terminal event;
//! - [`MultipartFormData`] assembles multipart bodies either fully in
//!   memory or streamed to disk under a fixed-size copy buffer.
//!
//! The engine owns no scheduler: correctness holds under arbitrary callback
//! interleaving and arbitrary callback thread identity.
//!
//! ## Usage
//!
//! ```no_run
//! use weft::EngineBuilder;
//! # fn connector() -> Box<dyn weft_transport::TransportConnector> { unimplemented!() }
//!
//! let engine = EngineBuilder::new().build(connector().as_ref()).unwrap();
//! let request = engine.get("https://example.com/things");
//! request
//!     .validate_status(200..300)
//!     .response_string(move |response| {
//!         println!("{:?}", response.result);
//!     });
//! ```

mod bounded;
mod delegate;
mod dispatch;
mod encoding;
mod engine;
mod error;
mod multipart;
mod multiplexer;
mod paths;
mod pipeline;
mod progress;
mod registry;
mod request;
mod serialize;
mod validation;

pub use dispatch::{Executor, InlineExecutor};
pub use encoding::{JsonEncoding, ParameterEncoding, Parameters, UrlEncoding};
pub use engine::{
    authorization_header, EngineBuilder, RequestAdapter, RequestEngine, TrustPolicy,
    MULTIPART_ENCODING_MEMORY_THRESHOLD,
};
pub use error::{
    Error, MultipartEncodingFailureReason, ParameterEncodingFailureReason, Result,
    ResponseSerializationFailureReason, ResponseValidationFailureReason,
};
pub use multipart::MultipartFormData;
pub use paths::DownloadLocations;
pub use progress::Progress;
pub use request::{
    DataRequest, DownloadRequest, Response, StreamingDownloadRequest, UploadRequest,
};
pub use serialize::{JsonDeserializer, RawDeserializer, ResponseDeserializer, StringDeserializer};

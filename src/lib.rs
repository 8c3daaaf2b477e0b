// Library root
// -----------
// This crate exposes the resumable (chunked) upload client behind the
// `forge-oss` binary.
//
// Module responsibilities:
// - `plan`: splits a file size into the ordered byte ranges to send.
// - `session`: session id generation, upload target/session state and the
//   checkpoint written between chunks.
// - `chunk`: reads one range and sends it; defines the transport and
//   credential seams.
// - `upload`: drives the ranges in order and records the finished object.
// - `api`: reqwest implementation of the transport and credential seams.
// - `state`: the local working directory shared with other commands.
// - `urn`: base64 URNs derived from object ids.
// - `config`, `error`: environment configuration and the error type.
// - `ui`: console progress, prompts and result reporting.
pub mod api;
pub mod chunk;
pub mod config;
pub mod error;
pub mod plan;
pub mod session;
pub mod state;
pub mod ui;
pub mod upload;
pub mod urn;

pub use error::{Result, UploadError};

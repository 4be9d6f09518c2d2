//! # Darkroom
//!
//! A small HTTP service that applies declarative image transformations.
//! Clients POST a JSON payload carrying a base64 image and a set of named
//! directives; the service answers with the transformed image. A second
//! endpoint streams processed frames as a `multipart/x-mixed-replace` body.
//!
//! # Architecture: Request → Pipeline → Response
//!
//! ```text
//! accept ─► worker pool ─► Session (one per connection)
//!                              │
//!                              ├─ read request (http)
//!                              ├─ route by path + method
//!                              ├─ POST /: request::decode → PipelineBuilder::build → Pipeline::apply → JPEG
//!                              ├─ GET /stream: stream::Emitter pulls frames, transforms, pushes parts
//!                              └─ write response, keep-alive or close
//! ```
//!
//! The interesting guarantees live in two places:
//!
//! - **Ordering**: a pipeline always applies its stages in the registry's
//!   canonical order, never in the order the directives appeared in the
//!   payload. Two payloads with the same directives produce identical images.
//! - **Error scope**: validation, size and processing failures are answered
//!   with an error response and the connection stays usable; transport and
//!   framing failures end the connection.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`registry`] | Directive name → operation factory table, canonical order |
//! | [`pipeline`] | `DirectiveSet`, `Pipeline`, `PipelineBuilder` |
//! | [`request`] | Payload decoding and validation for `POST /` |
//! | [`session`] | Per-connection state machine: read, route, dispatch, respond |
//! | [`stream`] | Multipart frame emitter and frame sources |
//! | [`server`] | Listener, acceptor thread and bounded worker pool |
//! | [`http`] | HTTP/1.x request reading and response writing |
//! | [`imaging`] | Image operations, pixel kernels, codecs |
//! | [`config`] | Layered TOML configuration |
//! | [`client`] | Blocking client for `POST /` and `GET` |
//! | [`error`] | Error taxonomy and status mapping |

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod imaging;
pub mod pipeline;
pub mod registry;
pub mod request;
pub mod server;
pub mod session;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_helpers;

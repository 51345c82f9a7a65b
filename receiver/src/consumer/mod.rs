//! Downstream consumers
//!
//! - [`StdoutConsumer`] - prints records, for development
//! - [`OtlpGrpcConsumer`] - forwards to an OTLP/gRPC collector

mod otlp;
mod stdout;

pub use otlp::OtlpGrpcConsumer;
pub use stdout::StdoutConsumer;

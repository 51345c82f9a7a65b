//! Production wiring: Kafka in, OTLP/gRPC out, custom metrics address.
//!
//! Broker settings come from the `LAITURI_*` environment variables; the
//! collector endpoint from `OTLP_ENDPOINT` (default `http://localhost:4317`).
//!
//! ```bash
//! cargo run -p laituri-runtime --features kafka --example custom_runtime
//! ```

use laituri_runtime::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let endpoint =
        std::env::var("OTLP_ENDPOINT").unwrap_or_else(|_| "http://localhost:4317".to_string());

    RuntimeBuilder::new()
        .metrics_addr("127.0.0.1:9091".parse()?)
        .configure(|setup| async move {
            let broker = KafkaService::new(setup.config().broker.clone())?;
            let consumer = OtlpGrpcConsumer::lazy(endpoint)?;
            Ok(setup.broker(broker).consumer(consumer))
        })
        .await
}

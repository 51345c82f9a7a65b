//! Minimal receiver: in-memory broker, records printed to stdout.
//!
//! Publishes a few payloads in different formats, then waits for Ctrl+C.
//!
//! ```bash
//! cargo run -p laituri-runtime --example simple_pipeline
//! ```

use laituri_runtime::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    laituri_runtime::run(|setup| async move {
        let broker = MemoryBroker::new();
        let queue = setup.config().receiver.queue.clone();

        broker.publish(
            &queue,
            r#"{"trace_id": "0af7651916cd43dd8448eb211c80319c", "span_id": "b7ad6b7169203331", "name": "GET /orders"}"#,
        );
        broker.publish(
            &queue,
            "{\"body\": \"order placed\", \"severity_text\": \"INFO\"}\n{\"body\": \"payment ok\", \"severity_number\": 9}",
        );

        Ok(setup.broker(broker).consumer(StdoutConsumer::pretty()))
    })
    .await
}

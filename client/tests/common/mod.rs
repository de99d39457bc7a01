#![allow(dead_code)]
use pushpool::prelude::*;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn options(streams_per_endpoint: usize) -> ConnectionOptions {
    ConnectionOptions {
        streams_per_endpoint,
        ..Default::default()
    }
}

/// A ready connection whose gateway answers with `handler`.
pub async fn connect(
    options: ConnectionOptions,
    handler: GatewayHandlerObject,
) -> Result<Connection<ChannelProvider>, Error> {
    let (builder, gateway) = ChannelProvider::builder();
    gateway.serve(handler);
    let connection = Connection::new(options);
    connection.initialize(|config| builder.build(config)).await?;
    Ok(connection)
}

pub fn hello() -> Notification {
    Notification::json(&serde_json::json!({ "aps": { "alert": "hello" } }))
        .expect("serializable payload")
        .with_topic("com.example.app")
}

//! A controller driving a line-protocol device over an in-memory stream.

use anyhow::{anyhow, bail, Result};
use hwsync::codec::{CodecEndpoint, CommandCodec};
use hwsync::transport::StreamTransportBuilder;
use hwsync::{CommandDescriptor, ConnectionState, HardwareController, Qualifier, Value};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

/// Simulated DSP speaking `<id>VOL<level>` / `<id>VOL?`.
async fn fake_dsp(stream: DuplexStream, mut level: i64, answer_queries: usize) {
    let mut stream = BufReader::new(stream);
    let mut answered = 0;
    let mut line = String::new();
    loop {
        line.clear();
        match stream.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let frame = line.trim_end();
        let Some((id, rest)) = frame.split_once("VOL") else {
            continue;
        };
        if rest == "?" {
            if answered == answer_queries {
                continue;
            }
            answered += 1;
            let reply = format!("{id}VOL{level}\r\n");
            if stream.get_mut().write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        } else if let Ok(new_level) = rest.parse() {
            level = new_level;
        }
    }
}

fn device_id(q: &Qualifier) -> Result<String> {
    match q.get("Device ID") {
        Some(id) => Ok(id.to_string()),
        None => bail!("missing Device ID"),
    }
}

fn encode_volume(value: &Value, q: &Qualifier) -> Result<Vec<u8>> {
    let level = value.as_i64().ok_or_else(|| anyhow!("volume must be an integer"))?;
    Ok(format!("{}VOL{}", device_id(q)?, level).into_bytes())
}

fn query_volume(q: &Qualifier) -> Result<Vec<u8>> {
    Ok(format!("{}VOL?", device_id(q)?).into_bytes())
}

fn decode_volume(reply: &[u8], _: &Qualifier) -> Result<Value> {
    let text = std::str::from_utf8(reply)?;
    let (_, level) = text
        .split_once("VOL")
        .ok_or_else(|| anyhow!("unexpected reply {text:?}"))?;
    Ok(Value::from(level.parse::<i64>()?))
}

fn controller(stream: DuplexStream, threshold: u32) -> std::sync::Arc<HardwareController> {
    let transport = StreamTransportBuilder::new()
        .with_timeout(Duration::from_millis(200))
        .build(stream);
    let endpoint = CodecEndpoint::new("dsp", transport).with_command(
        "Volume",
        CommandCodec::new()
            .with_set(encode_volume)
            .with_query(query_volume, decode_volume),
    );
    HardwareController::builder("dsp", std::sync::Arc::new(endpoint))
        .command(CommandDescriptor::with_qualifiers("Volume", ["Device ID"]))
        .miss_threshold(threshold)
        .build()
}

#[tokio::test]
async fn set_then_poll_observes_new_level() {
    let (client, server) = tokio::io::duplex(1024);
    let dsp = tokio::spawn(fake_dsp(server, 20, usize::MAX));
    let device = controller(client, 15);
    let q = Qualifier::new().with("Device ID", "2");

    assert_eq!(device.update("Volume", &q).await.unwrap(), Some(Value::from(20)));
    device.set("Volume", Value::from(35), &q).await.unwrap();
    assert_eq!(device.update("Volume", &q).await.unwrap(), Some(Value::from(35)));
    assert_eq!(device.read_status("Volume", &q), Some(Value::from(35)));

    drop(device);
    dsp.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unanswered_queries_count_as_misses() {
    let (client, server) = tokio::io::duplex(1024);
    let _dsp = tokio::spawn(fake_dsp(server, 20, 1));
    let device = controller(client, 1);
    let q = Qualifier::new().with("Device ID", "2");

    assert!(device.update("Volume", &q).await.unwrap().is_some());
    assert_eq!(device.update("Volume", &q).await.unwrap(), None);
    assert_eq!(device.update("Volume", &q).await.unwrap(), None);
    assert_eq!(device.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn codec_errors_surface_as_transport_errors() {
    let (client, server) = tokio::io::duplex(1024);
    let _dsp = tokio::spawn(fake_dsp(server, 20, usize::MAX));
    let device = controller(client, 15);

    let err = device
        .set("Volume", Value::from("loud"), &Qualifier::new().with("Device ID", "2"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("volume must be an integer"));

    // A qualifier the codec cannot encode fails the call, not the device.
    assert!(device.update("Volume", &Qualifier::new()).await.is_err());
    assert_eq!(device.consecutive_misses(), 0);
}

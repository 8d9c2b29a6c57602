use crate::Result;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

const BINANCE_WS_BASE: &str = "wss://stream.binance.com:9443";
const RECONNECT_DELAY_SECS: u64 = 5;

/// Default buffer size for the tick channel
pub const TICK_CHANNEL_SIZE: usize = 1000;

/// One trade print from the streaming connection
#[derive(Debug, Clone)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CombinedMessage {
    #[allow(dead_code)]
    stream: String,
    data: TradeData,
}

#[derive(Debug, Deserialize)]
struct TradeData {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "T", default)]
    trade_time_ms: i64,
}

pub fn create_tick_channel() -> (mpsc::Sender<Tick>, mpsc::Receiver<Tick>) {
    mpsc::channel(TICK_CHANNEL_SIZE)
}

fn combined_stream_url(base: &str, symbols: &[String]) -> String {
    let streams: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}@trade", s.to_lowercase()))
        .collect();
    format!(
        "{}/stream?streams={}",
        base.trim_end_matches('/'),
        streams.join("/")
    )
}

fn parse_combined_message(text: &str) -> Option<Tick> {
    let msg: CombinedMessage = serde_json::from_str(text).ok()?;
    let price = msg.data.price.parse::<f64>().ok()?;
    if price <= 0.0 {
        return None;
    }
    let ts = Utc
        .timestamp_millis_opt(msg.data.trade_time_ms)
        .single()
        .unwrap_or_else(Utc::now);
    Some(Tick {
        symbol: msg.data.symbol,
        price,
        ts,
    })
}

/// One websocket session: subscribe to combined trade streams and forward
/// ticks until the connection drops or the receiver goes away.
pub async fn subscribe_trades(symbols: &[String], sender: mpsc::Sender<Tick>) -> Result<()> {
    let url = combined_stream_url(BINANCE_WS_BASE, symbols);
    tracing::info!("Connecting to trade stream: {}", url);

    let (ws_stream, _response) = connect_async(url.as_str()).await?;
    tracing::info!("Trade stream connected ({} symbols)", symbols.len());

    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(tick) = parse_combined_message(&text) {
                    // A full channel means the consumer is behind; dropping a
                    // trade print is fine, the next one supersedes it
                    if sender.try_send(tick).is_err() && sender.is_closed() {
                        tracing::info!("Tick receiver dropped, closing stream");
                        return Ok(());
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                write.send(Message::Pong(payload)).await?;
            }
            Ok(Message::Close(frame)) => {
                tracing::warn!("Trade stream closed by server: {:?}", frame);
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => {
                return Err(format!("Trade stream error: {}", e).into());
            }
        }
    }

    Ok(())
}

/// Reconnecting wrapper around `subscribe_trades`; runs until the tick
/// receiver is dropped.
pub async fn run_trade_stream(symbols: Vec<String>, sender: mpsc::Sender<Tick>) {
    loop {
        match subscribe_trades(&symbols, sender.clone()).await {
            Ok(()) => {
                if sender.is_closed() {
                    return;
                }
                tracing::info!("Trade stream ended, reconnecting...");
            }
            Err(e) => {
                tracing::error!("Trade stream failed: {}", e);
            }
        }
        sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
    }
}

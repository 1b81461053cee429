/// Fire-and-forget notification sink: operator alerts (order-submission
/// failure, fatal errors) delivered out-of-band from the engine's own state.
/// Failures here are logged and swallowed — a broken notification channel
/// must never fail a trading operation.
use async_trait::async_trait;
use reqwest::Client;
use tracing::warn;

const BASE_URL: &str = "https://api.telegram.org";

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_text(&self, text: &str);
    async fn send_document(&self, filename: &str, bytes: Vec<u8>, caption: Option<&str>);
}

pub struct TelegramSink {
    client: Client,
    bot_token: String,
    channel_id: String,
}

impl TelegramSink {
    pub fn new(bot_token: String, channel_id: String) -> Self {
        TelegramSink {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build HTTP client"),
            bot_token,
            channel_id,
        }
    }

    fn base(&self) -> String {
        format!("{}/bot{}", BASE_URL, self.bot_token)
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn send_text(&self, text: &str) {
        let payload = serde_json::json!({ "chat_id": self.channel_id, "text": text });
        if let Err(e) = self
            .client
            .post(format!("{}/sendMessage", self.base()))
            .json(&payload)
            .send()
            .await
        {
            warn!(error = %e, "telegram sendMessage failed");
        }
    }

    async fn send_document(&self, filename: &str, bytes: Vec<u8>, caption: Option<&str>) {
        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", self.channel_id.clone())
            .part(
                "document",
                reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string()),
            );
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }

        if let Err(e) = self
            .client
            .post(format!("{}/sendDocument", self.base()))
            .multipart(form)
            .send()
            .await
        {
            warn!(error = %e, "telegram sendDocument failed");
        }
    }
}

/// Used when no notification channel is configured.
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    async fn send_text(&self, _text: &str) {}
    async fn send_document(&self, _filename: &str, _bytes: Vec<u8>, _caption: Option<&str>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telegram_base_url_embeds_bot_token() {
        let sink = TelegramSink::new("my-token".to_string(), "chan".to_string());
        assert_eq!(sink.base(), "https://api.telegram.org/botmy-token");
    }

    #[tokio::test]
    async fn noop_sink_swallows_calls_without_panicking() {
        let sink = NoopSink;
        sink.send_text("hello").await;
        sink.send_document("report.csv", vec![1, 2, 3], Some("caption")).await;
    }
}

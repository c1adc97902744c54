//! Image retrieval and description.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};

use crate::error::{FlowError, Result};
use crate::llm::LanguageModel;
use crate::message::{Attachment, Message};
use crate::tool::{Tool, ToolSpec, ValueType};

use super::{get_checked, http_client, http_failure};

const DESCRIBE_PROMPT: &str = "You are a careful visual analyst. Describe what the image \
     shows, paying attention to people, costumes, makeup and setting.";

const DEFAULT_QUESTION: &str = "Describe this image.";

/// Download `url` with a browser user-agent and inline it as a data URI.
pub async fn fetch_image(url: &str, timeout: Duration) -> Result<Attachment> {
    fetch_with(&http_client(timeout)?, url).await
}

async fn fetch_with(client: &reqwest::Client, url: &str) -> Result<Attachment> {
    let bytes = get_checked(client, "fetch_image", url)
        .await?
        .bytes()
        .await
        .map_err(|err| http_failure("fetch_image", err))?;
    let mime = sniff_mime_type(&bytes).ok_or_else(|| {
        FlowError::tool_failure("fetch_image", format!("`{url}` did not return an image"))
    })?;
    tracing::debug!(%url, %mime, size = bytes.len(), "fetched image");
    Ok(
        Attachment::image(format!("data:{mime};base64,{}", STANDARD.encode(&bytes)))
            .with_mime_type(mime),
    )
}

/// Recognise common image formats by their magic bytes.
pub fn sniff_mime_type(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => Some("image/png"),
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [b'G', b'I', b'F', b'8', ..] => Some("image/gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        [b'B', b'M', ..] => Some("image/bmp"),
        _ => None,
    }
}

fn data_uri_mime(uri: &str) -> Option<String> {
    uri.strip_prefix("data:")?
        .split(';')
        .next()
        .filter(|mime| mime.starts_with("image/"))
        .map(str::to_string)
}

/// Asks a vision-capable model about an image given by URL or data URI.
pub struct DescribeImageTool {
    model: Arc<dyn LanguageModel>,
    client: reqwest::Client,
}

impl DescribeImageTool {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            model,
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl Tool for DescribeImageTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "describe_image",
            "Describes the content of an image, optionally answering a question about it.",
        )
        .input("image", ValueType::Image, "Image URL or data URI.")
        .optional_input(
            "question",
            ValueType::String,
            "What to find out about the image.",
        )
        .output(ValueType::String)
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let image = input
            .get("image")
            .and_then(Value::as_str)
            .ok_or_else(|| FlowError::argument("describe_image", "missing `image`"))?;
        let question = input
            .get("question")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_QUESTION);

        let attachment = if image.starts_with("data:") {
            let mime = data_uri_mime(image).ok_or_else(|| {
                FlowError::argument("describe_image", "data URI is not an image")
            })?;
            Attachment::image(image).with_mime_type(mime)
        } else {
            fetch_with(&self.client, image).await?
        };

        let turn = Message::user(question).with_attachments(vec![attachment]);
        let description = self
            .model
            .complete(DESCRIBE_PROMPT, &[turn])
            .await
            .map_err(|err| {
                if err.is_transient() {
                    FlowError::transient_tool_failure("describe_image", err)
                } else {
                    FlowError::tool_failure("describe_image", err)
                }
            })?;
        Ok(json!(description))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubModel;
    use crate::message::AttachmentKind;

    #[test]
    fn test_sniff_mime_type() {
        assert_eq!(sniff_mime_type(b"\x89PNG\r\n\x1a\n"), Some("image/png"));
        assert_eq!(sniff_mime_type(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_mime_type(b"GIF89a"), Some("image/gif"));
        assert_eq!(sniff_mime_type(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_mime_type(b"<html>"), None);
    }

    #[tokio::test]
    async fn test_describe_data_uri() {
        let model = StubModel::new(vec!["A man in a purple suit with green hair.".into()]);
        let tool = DescribeImageTool::new(model.clone(), Duration::from_secs(1)).unwrap();
        let uri = format!("data:image/png;base64,{}", STANDARD.encode(b"\x89PNG...."));

        let out = tool
            .call(json!({"image": uri, "question": "Who is this guest?"}))
            .await
            .unwrap();
        assert_eq!(out, json!("A man in a purple suit with green hair."));

        let request = &model.requests()[0];
        assert_eq!(request.history[0].content, "Who is this guest?");
        let attachment = &request.history[0].attachments[0];
        assert_eq!(attachment.kind, AttachmentKind::Image);
        assert_eq!(attachment.uri, uri);
        assert_eq!(attachment.mime_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_rejects_non_image_data_uri() {
        let tool = DescribeImageTool::new(StubModel::new(vec![]), Duration::from_secs(1)).unwrap();
        let err = tool
            .call(json!({"image": "data:text/plain;base64,aGk="}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Argument);
    }
}

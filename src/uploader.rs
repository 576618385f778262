use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    Body, Client,
    multipart::{Form, Part},
};
use webm_bus::{
    error::{Error, Result},
    upload::Uploader,
};

/// Posts each segment as a multipart form with `filename` and `file` fields.
pub struct HttpUploader {
    client: Client,
    url: String,
}

impl HttpUploader {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload_file(&self, filename: &str, file_buffer: Bytes) -> Result<()> {
        let size = file_buffer.len() as u64;
        let part = Part::stream_with_length(Body::from(file_buffer), size)
            .file_name(filename.to_string())
            .mime_str("video/webm")
            .map_err(|e| Error::upload(filename, e))?;
        let form = Form::new()
            .text("filename", filename.to_string())
            .part("file", part);

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::upload(filename, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upload(filename, format!("{} {}", status, body.trim())));
        }
        log::debug!("uploaded {} ({} bytes) to {}", filename, size, self.url);
        Ok(())
    }
}

#[cfg(test)]
#[path = "uploader_test.rs"]
mod uploader_test;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::Request;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use log::{debug, info, warn};

use crate::batch::CloudUploader;

/// HTTP POST uploader for reading batches. `send` is fire-and-forget: the
/// request is spawned onto the runtime and its outcome only logged, so a slow
/// or failing collector never stalls the notification path.
pub struct HttpUploader {
    client: Client<HttpConnector, Full<Bytes>>,
    url: Option<String>,
    headers: Vec<(String, String)>,
    body: Option<String>,
}

impl HttpUploader {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            url: None,
            headers: Vec::new(),
            body: None,
        }
    }
}

impl CloudUploader for HttpUploader {
    fn set_url(&mut self, url: String) {
        debug!("Upload endpoint: {}", url);
        self.url = Some(url);
    }

    fn set_headers(&mut self, headers: Vec<(String, String)>) {
        self.headers = headers;
    }

    fn set_body(&mut self, body: String) {
        self.body = Some(body);
    }

    fn send(&mut self) {
        let Some(url) = self.url.clone() else {
            warn!("Dropping upload, no endpoint configured");
            return;
        };
        let Some(body) = self.body.take() else {
            warn!("Dropping upload, no body set");
            return;
        };

        let mut builder = Request::post(url.as_str());
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let request = match builder.body(Full::new(Bytes::from(body))) {
            Ok(request) => request,
            Err(e) => {
                warn!("Failed to build upload request: {}", e);
                return;
            }
        };

        let client = self.client.clone();
        tokio::spawn(async move {
            match client.request(request).await {
                Ok(response) => info!("Uploaded reading batch: {}", response.status()),
                Err(e) => warn!("Reading batch upload failed: {}", e),
            }
        });
    }
}

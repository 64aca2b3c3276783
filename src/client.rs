//! Control-plane client — typed operations for artifact lookup, build
//! lookup, build creation, and log streaming.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::artifact::Artifact;
use crate::models::build::Build;
use crate::models::options::BuildCreateOpts;

/// Typed operations against the control plane. The build coordinator and
/// tests hold this capability; `HttpBuildApi` is the wire implementation.
#[async_trait]
pub trait BuildApi: Send + Sync {
    /// Look up an artifact by canonical key.
    async fn artifact_info(&self, key: &str) -> Result<Artifact>;

    /// Look up a build by canonical key or build id.
    async fn build_info(&self, key: &str) -> Result<Build>;

    /// Create a new build.
    async fn build_create(&self, opts: &BuildCreateOpts) -> Result<Build>;

    /// Stream log bytes for a build to `w` until the build reaches a
    /// terminal state or the connection ends. Returns stream errors but
    /// never build-failure errors.
    async fn logs_stream(
        &self,
        w: &mut (dyn AsyncWrite + Send + Unpin),
        build_id: &str,
    ) -> Result<()>;
}

#[async_trait]
impl<T: BuildApi + ?Sized> BuildApi for std::sync::Arc<T> {
    async fn artifact_info(&self, key: &str) -> Result<Artifact> {
        (**self).artifact_info(key).await
    }

    async fn build_info(&self, key: &str) -> Result<Build> {
        (**self).build_info(key).await
    }

    async fn build_create(&self, opts: &BuildCreateOpts) -> Result<Build> {
        (**self).build_create(opts).await
    }

    async fn logs_stream(
        &self,
        w: &mut (dyn AsyncWrite + Send + Unpin),
        build_id: &str,
    ) -> Result<()> {
        (**self).logs_stream(w, build_id).await
    }
}

/// HTTP implementation of [`BuildApi`] over reqwest.
pub struct HttpBuildApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpBuildApi {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.http.get(format!("{}{path}", self.base_url)))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.token.is_empty() {
            req
        } else {
            req.bearer_auth(&self.token)
        }
    }

    /// Decode a response, mapping 404 to the distinguishable not-found kind.
    async fn decode<T: DeserializeOwned>(resp: reqwest::Response, what: &str) -> Result<T> {
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(what.to_string()));
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Api { status, message });
        }
        Ok(resp.json::<T>().await?)
    }
}

#[async_trait]
impl BuildApi for HttpBuildApi {
    async fn artifact_info(&self, key: &str) -> Result<Artifact> {
        let resp = self.get(&format!("/artifacts/{key}")).send().await?;
        Self::decode(resp, key).await
    }

    async fn build_info(&self, key: &str) -> Result<Build> {
        let resp = self.get(&format!("/builds/{key}")).send().await?;
        Self::decode(resp, key).await
    }

    async fn build_create(&self, opts: &BuildCreateOpts) -> Result<Build> {
        let resp = self
            .authorize(self.http.post(format!("{}/builds", self.base_url)))
            .json(opts)
            .send()
            .await?;
        Self::decode(resp, &opts.repository).await
    }

    async fn logs_stream(
        &self,
        w: &mut (dyn AsyncWrite + Send + Unpin),
        build_id: &str,
    ) -> Result<()> {
        let resp = self.get(&format!("/builds/{build_id}/logs")).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(build_id.to_string()));
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Api { status, message });
        }

        // Forward chunks verbatim as the service emits them.
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            w.write_all(&chunk).await?;
        }
        w.flush().await?;

        Ok(())
    }
}

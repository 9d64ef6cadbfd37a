use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Method};
use tracing::debug;

use crate::error::LLMError;

use super::{
    DynHttpTransport, HttpBodyStream, HttpMethod, HttpRequest, HttpResponse, HttpStreamResponse,
    HttpTransport, TransportFactory, TransportOptions,
};

/// 基于 reqwest 的默认 HttpTransport
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// 使用自定义 reqwest::Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// 按凭证的超时与代理设置构建
    pub fn with_options(options: &TransportOptions) -> Result<Self, LLMError> {
        let mut builder = Client::builder();
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(proxy) = &options.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|err| LLMError::transport(format!("invalid proxy url {proxy}: {err}")))?;
            builder = builder.proxy(proxy);
        }
        builder
            .build()
            .map(Self::new)
            .map_err(|err| LLMError::transport(format!("failed to create reqwest client: {err}")))
    }

    fn method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        }
    }

    fn build_request(&self, request: HttpRequest) -> Result<reqwest::RequestBuilder, LLMError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
            timeout,
        } = request;
        let mut builder = self.client.request(Self::method(method), &url);

        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        for (name, value) in headers {
            let header_name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| LLMError::transport(format!("invalid header name: {err}")))?;
            let header_value = reqwest::header::HeaderValue::from_str(&value).map_err(|err| {
                LLMError::transport(format!("invalid header value for {header_name}: {err}"))
            })?;
            builder = builder.header(header_name, header_value);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }
        Ok(builder)
    }

    async fn dispatch(&self, request: HttpRequest) -> Result<reqwest::Response, LLMError> {
        debug!(method = request.method.as_str(), url = %request.url, "sending http request");
        self.build_request(request)?
            .send()
            .await
            .map_err(|err| LLMError::transport(err.to_string()))
    }

    fn headers_to_map(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        let response = self.dispatch(request).await?;
        let status = response.status().as_u16();
        let headers = Self::headers_to_map(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|err| LLMError::transport(err.to_string()))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        let response = self.dispatch(request).await?;
        let status = response.status().as_u16();
        let headers = Self::headers_to_map(response.headers());
        let body: HttpBodyStream = Box::pin(response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|err| LLMError::transport(err.to_string()))
        }));

        Ok(HttpStreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// 每个请求按凭证设置新建 reqwest 客户端 无设置时复用默认客户端
pub struct ReqwestTransportFactory {
    default: ReqwestTransport,
}

impl ReqwestTransportFactory {
    pub fn new() -> Result<Self, LLMError> {
        Ok(Self {
            default: ReqwestTransport::with_options(&TransportOptions::default())?,
        })
    }
}

impl TransportFactory for ReqwestTransportFactory {
    fn build(&self, options: &TransportOptions) -> Result<DynHttpTransport, LLMError> {
        if options == &TransportOptions::default() {
            return Ok(Arc::new(self.default.clone()));
        }
        Ok(Arc::new(ReqwestTransport::with_options(options)?))
    }
}

/// 便捷构造线程安全 Transport
pub fn default_dyn_transport() -> Result<DynHttpTransport, LLMError> {
    Ok(Arc::new(ReqwestTransport::with_options(&TransportOptions::default())?))
}

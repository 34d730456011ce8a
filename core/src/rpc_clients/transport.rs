use alloy::{
    rpc::json_rpc::{RequestPacket, ResponsePacket},
    transports::{
        TransportError, TransportErrorKind, TransportFut, TransportResult,
        http::reqwest::{Client, Url, header::HeaderValue},
    },
};
use std::task;
use tower::Service;
use tracing::{Instrument, debug_span, trace};

use crate::error::SipError;

/// Header carrying the RPC provider API key
pub const RPC_API_KEY_HEADER: &str = "x-api-key";

/// JSON-RPC over the engine's pooled HTTP client.
///
/// The API key is attached to each RPC request instead of being a client
/// default header: the same client also talks to the history indexer, which
/// must never see the key.
#[derive(Clone, Debug)]
pub struct RpcTransport {
    client: Client,
    endpoint: Url,
    api_key: Option<HeaderValue>,
}

impl RpcTransport {
    pub fn new(client: Client, endpoint: Url, api_key: Option<&str>) -> Result<Self, SipError> {
        let api_key = api_key
            .map(|key| {
                let mut value = HeaderValue::from_str(key).map_err(|e| SipError::RpcConfigError {
                    message: format!("RPC API key is not a valid header value: {e}"),
                })?;
                value.set_sensitive(true);
                Ok::<_, SipError>(value)
            })
            .transpose()?;

        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn send(self, packet: RequestPacket) -> TransportResult<ResponsePacket> {
        let mut request = self.client.post(self.endpoint).json(&packet);
        if let Some(key) = self.api_key {
            request = request.header(RPC_API_KEY_HEADER, key);
        }

        let response = request.send().await.map_err(TransportErrorKind::custom)?;
        let status = response.status();
        let body = response.bytes().await.map_err(TransportErrorKind::custom)?;
        trace!(status = status.as_u16(), bytes = body.len(), "rpc response");

        // rate limits and gateway errors surface as HttpStatus for the caller
        if !status.is_success() {
            return Err(TransportErrorKind::http_error(
                status.as_u16(),
                String::from_utf8_lossy(&body).into_owned(),
            ));
        }

        serde_json::from_slice(&body)
            .map_err(|e| TransportError::deser_err(e, String::from_utf8_lossy(&body)))
    }
}

impl Service<RequestPacket> for RpcTransport {
    type Response = ResponsePacket;
    type Error = TransportError;
    type Future = TransportFut<'static>;

    fn poll_ready(&mut self, _cx: &mut task::Context<'_>) -> task::Poll<Result<(), Self::Error>> {
        task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, packet: RequestPacket) -> Self::Future {
        let span = debug_span!("rpc", host = self.endpoint.host_str().unwrap_or_default());
        Box::pin(self.clone().send(packet).instrument(span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Url {
        Url::parse("https://api.avax-test.network/ext/bc/C/rpc").unwrap()
    }

    #[test]
    fn api_key_is_marked_sensitive() {
        let transport = RpcTransport::new(Client::new(), endpoint(), Some("secret")).unwrap();
        let key = transport.api_key.as_ref().unwrap();
        assert!(key.is_sensitive());
        assert_eq!(format!("{key:?}"), "Sensitive");
    }

    #[test]
    fn rejects_unprintable_api_key() {
        let result = RpcTransport::new(Client::new(), endpoint(), Some("bad\nkey"));
        assert!(matches!(result, Err(SipError::RpcConfigError { .. })));
    }
}

use async_trait::async_trait;
use lobridge_core::{
    BridgeConnector, BridgeError, BridgeSession, EndpointAddress, ProtocolNegotiator,
};
use tokio::net::TcpStream;
use tracing::debug;

/// Connects to the engine's accept socket and hands the stream to a
/// [`ProtocolNegotiator`] for the bridge handshake.
pub struct SocketConnector<N: ProtocolNegotiator> {
    negotiator: N,
}

impl<N: ProtocolNegotiator> SocketConnector<N> {
    pub fn new(negotiator: N) -> Self {
        Self { negotiator }
    }

    pub fn negotiator(&self) -> &N {
        &self.negotiator
    }
}

#[async_trait]
impl<N: ProtocolNegotiator> BridgeConnector for SocketConnector<N> {
    async fn connect(
        &self,
        endpoint: &EndpointAddress,
    ) -> Result<Box<dyn BridgeSession>, BridgeError> {
        let stream = TcpStream::connect(endpoint.socket_addr()).await?;
        // tcpNoDelay=1 in the connection string
        stream.set_nodelay(true)?;
        debug!(
            endpoint = %endpoint,
            connection = %endpoint.connection_string(),
            "Socket connected, negotiating bridge"
        );

        self.negotiator
            .negotiate(stream, &endpoint.uno_url(), &endpoint.bridge_name())
            .await
    }
}

//! Remote-object bridge to the engine, seen from the converter.
//!
//! The wire codec of the bridge lives behind [`ProtocolNegotiator`]; the
//! converter only needs a connected session, two named services out of it
//! (the desktop and the dispatch helper) and a handful of calls on loaded
//! documents.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::{EndpointAddress, PropertyValue};

pub const DESKTOP_SERVICE: &str = "com.sun.star.frame.Desktop";
pub const DISPATCH_HELPER_SERVICE: &str = "com.sun.star.frame.DispatchHelper";

/// Dispatch command used as a cheap liveness probe
pub const ABOUT_COMMAND: &str = ".uno:About";
pub const COMPARE_DOCUMENTS_COMMAND: &str = ".uno:CompareDocuments";

/// Errors raised by the bridge or by the engine through it
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The remote side is gone: the bridge or the object was disposed
    #[error("bridge disposed")]
    Disposed,

    /// The engine did not answer in time; it may be hung
    #[error("no answer from the engine within {0:?}")]
    Timeout(std::time::Duration),

    /// The engine rejected the call
    #[error("remote call failed: {0}")]
    Remote(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn remote(msg: impl ToString) -> Self {
        Self::Remote(msg.to_string())
    }

    pub fn is_disposed(&self) -> bool {
        match self {
            BridgeError::Disposed => true,
            BridgeError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Frame of the engine a dispatch is addressed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRef {
    pub name: String,
}

/// A document loaded in the engine
#[async_trait]
pub trait Document: Send + Sync {
    async fn supports_service(&self, service: &str) -> Result<bool, BridgeError>;

    /// Frame the document is shown in
    async fn frame(&self) -> Result<FrameRef, BridgeError>;

    async fn store_to_url(&self, url: &str, properties: &[PropertyValue])
    -> Result<(), BridgeError>;

    /// Close the document, handing ownership to the engine
    async fn close(&self) -> Result<(), BridgeError>;
}

/// The desktop service: loads documents and knows the current frame
#[async_trait]
pub trait Desktop: Send + Sync {
    async fn load_component_from_url(
        &self,
        url: &str,
        target_frame: &str,
        properties: &[PropertyValue],
    ) -> Result<Arc<dyn Document>, BridgeError>;

    async fn current_frame(&self) -> Result<Option<FrameRef>, BridgeError>;
}

/// The dispatch helper service: executes `.uno:` commands on a frame
#[async_trait]
pub trait DispatchHelper: Send + Sync {
    async fn execute_dispatch(
        &self,
        frame: Option<&FrameRef>,
        command: &str,
        target_frame: &str,
        search_flags: i32,
        arguments: &[PropertyValue],
    ) -> Result<(), BridgeError>;
}

/// An established bridge session
#[async_trait]
pub trait BridgeSession: Send + Sync {
    /// Look up a remote desktop service by name
    async fn desktop(&self, service: &str) -> Result<Arc<dyn Desktop>, BridgeError>;

    /// Look up a remote dispatch helper service by name
    async fn dispatch_helper(&self, service: &str) -> Result<Arc<dyn DispatchHelper>, BridgeError>;

    /// Dispose the session; the remote objects become invalid
    async fn dispose(&self) -> Result<(), BridgeError>;
}

/// Typed capabilities taken from a session once, at connection time
#[derive(Clone)]
pub struct Capabilities {
    pub desktop: Arc<dyn Desktop>,
    pub dispatcher: Arc<dyn DispatchHelper>,
}

impl Capabilities {
    pub async fn acquire(session: &dyn BridgeSession) -> Result<Self, BridgeError> {
        let desktop = session.desktop(DESKTOP_SERVICE).await?;
        let dispatcher = session.dispatch_helper(DISPATCH_HELPER_SERVICE).await?;
        Ok(Self {
            desktop,
            dispatcher,
        })
    }

    /// Whether the engine still answers: a no-op dispatch on the current
    /// frame
    pub async fn probe(&self) -> Result<(), BridgeError> {
        let frame = self.desktop.current_frame().await?;
        self.dispatcher
            .execute_dispatch(frame.as_ref(), ABOUT_COMMAND, "", 0, &[])
            .await
    }
}

/// Opens a bridge session to an endpoint
#[async_trait]
pub trait BridgeConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &EndpointAddress,
    ) -> Result<Box<dyn BridgeSession>, BridgeError>;
}

/// Speaks the bridge protocol over an already connected socket
#[async_trait]
pub trait ProtocolNegotiator: Send + Sync {
    /// Run the protocol handshake for `uno_url` and name the resulting bridge
    /// `bridge_name`
    async fn negotiate(
        &self,
        stream: TcpStream,
        uno_url: &str,
        bridge_name: &str,
    ) -> Result<Box<dyn BridgeSession>, BridgeError>;
}

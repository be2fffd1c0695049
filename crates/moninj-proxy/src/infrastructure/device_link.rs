//! TCP adapter for the binary device link.
//!
//! One connect attempt performs the magic/endianness handshake, installs the
//! command sender into the shared [`DeviceHandle`], and spawns a writer task
//! (drains the command channel onto the socket) and a reader task (decodes
//! frames into [`ProxyEvent`]s).  The reader reports `DeviceGone` only on an
//! unexpected death; a deliberate [`ManagedLink::close`] aborts it first, so
//! a superseded link instance never delivers further events.

use std::io::ErrorKind;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use moninj_core::protocol::messages::{EventType, ENDIAN_BIG, LINK_MAGIC};
use moninj_core::{
    decode_event, encode_command, Connector, DeviceCommand, DeviceEvent, LinkError, ManagedLink,
    ProtocolError,
};

use crate::application::proxy::{DeviceHandle, MonInjProxy, ProxyEvent};

/// Connect seam for the device link, driven by a reconnector.
pub struct DeviceLinkConnector {
    proxy: Arc<MonInjProxy>,
    device: Arc<DeviceHandle>,
    port: u16,
    events: mpsc::UnboundedSender<ProxyEvent>,
}

impl DeviceLinkConnector {
    pub fn new(
        proxy: Arc<MonInjProxy>,
        device: Arc<DeviceHandle>,
        port: u16,
        events: mpsc::UnboundedSender<ProxyEvent>,
    ) -> Self {
        Self { proxy, device, port, events }
    }
}

/// One established device link.
pub struct DeviceLink {
    device: Arc<DeviceHandle>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

#[async_trait]
impl ManagedLink for DeviceLink {
    async fn close(&mut self) {
        // Clear the handle before stopping the tasks so forwarding RPCs go
        // back to no-ops immediately.
        self.device.clear();
        self.reader.abort();
        self.writer.abort();
    }
}

#[async_trait]
impl Connector for DeviceLinkConnector {
    type Link = DeviceLink;

    async fn connect(&mut self) -> Result<DeviceLink, LinkError> {
        let host = self.proxy.device_host().ok_or(LinkError::NotConfigured)?;
        let stream = TcpStream::connect((host.as_str(), self.port)).await?;
        let (mut read_half, mut write_half) = stream.into_split();

        write_half.write_all(LINK_MAGIC).await?;
        let mut endian = [0u8; 1];
        read_half.read_exact(&mut endian).await?;
        if endian[0] != ENDIAN_BIG {
            return Err(LinkError::Handshake(
                ProtocolError::UnsupportedEndianness(endian[0]).to_string(),
            ));
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        self.device.install(cmd_tx);
        let writer = tokio::spawn(write_loop(write_half, cmd_rx));
        let reader = tokio::spawn(read_loop(read_half, self.events.clone()));
        let _ = self.events.send(ProxyEvent::DeviceUp);
        info!(host, port = self.port, "device link established");

        Ok(DeviceLink { device: Arc::clone(&self.device), reader, writer })
    }
}

async fn write_loop(mut half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<DeviceCommand>) {
    // Ends when the handle is cleared (sender dropped) or the socket dies;
    // the reader side notices the dead socket and reports it.
    while let Some(cmd) = rx.recv().await {
        if let Err(e) = half.write_all(&encode_command(&cmd)).await {
            warn!("device link write failed: {e}");
            break;
        }
    }
}

async fn read_loop(mut half: OwnedReadHalf, events: mpsc::UnboundedSender<ProxyEvent>) {
    loop {
        match read_event(&mut half).await {
            Ok(ev) => {
                if events.send(ProxyEvent::Device(ev)).is_err() {
                    break;
                }
            }
            Err(e) => {
                if e.kind() == ErrorKind::UnexpectedEof {
                    info!("device link closed by peer");
                } else {
                    warn!("device link read failed: {e}");
                }
                let _ = events.send(ProxyEvent::DeviceGone);
                break;
            }
        }
    }
}

/// Reads exactly one event frame.  Frame length follows from the type byte.
async fn read_event(half: &mut OwnedReadHalf) -> std::io::Result<DeviceEvent> {
    let mut ty = [0u8; 1];
    half.read_exact(&mut ty).await?;
    let len = match EventType::try_from(ty[0]) {
        Ok(EventType::Monitor) => 14,
        Ok(EventType::InjectionStatus) => 7,
        Err(()) => {
            return Err(std::io::Error::new(
                ErrorKind::InvalidData,
                ProtocolError::UnknownFrameType(ty[0]),
            ))
        }
    };
    let mut frame = vec![0u8; len];
    frame[0] = ty[0];
    half.read_exact(&mut frame[1..]).await?;
    let (ev, _) =
        decode_event(&frame).map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
    Ok(ev)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Controller side transports: S7 over ISO-on-TCP and an in-memory PLC.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::s7::{self, S7Error};

/// Errors from a controller transport.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("S7 protocol error: {0}")]
    Protocol(#[from] S7Error),

    #[error("Controller is not connected")]
    NotConnected,

    #[error("Write rejected: {0}")]
    Rejected(String),
}

/// Block-addressed writer to a programmable controller.
///
/// Implementations do not apply timeouts; the writer bounds every call.
#[async_trait]
pub trait ControllerTransport: Send + Sync {
    async fn open(&mut self) -> Result<(), ControllerError>;

    async fn close(&mut self) -> Result<(), ControllerError>;

    /// Write `data` into data block `block` starting at byte `offset`.
    async fn write(&mut self, block: u16, offset: u32, data: &[u8]) -> Result<(), ControllerError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Where an S7 controller listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S7Endpoint {
    /// IP address or hostname
    pub address: String,
    /// ISO-on-TCP port (default: 102)
    #[serde(default = "default_s7_port")]
    pub port: u16,
    /// Rack number, 0-7 (default: 0)
    #[serde(default)]
    pub rack: u8,
    /// Slot number, 0-31 (default: 1)
    #[serde(default = "default_slot")]
    pub slot: u8,
}

fn default_s7_port() -> u16 {
    s7::ISO_TCP_PORT
}

fn default_slot() -> u8 {
    1
}

impl S7Endpoint {
    pub fn new(address: impl Into<String>, rack: u8, slot: u8) -> Self {
        Self {
            address: address.into(),
            port: default_s7_port(),
            rack,
            slot,
        }
    }
}

/// S7 client holding one ISO-on-TCP connection.
pub struct S7Controller {
    endpoint: S7Endpoint,
    stream: Option<TcpStream>,
    pdu_size: u16,
    pdu_ref: u16,
}

impl S7Controller {
    pub fn new(endpoint: S7Endpoint) -> Self {
        Self {
            endpoint,
            stream: None,
            pdu_size: s7::REQUESTED_PDU_SIZE,
            pdu_ref: 0,
        }
    }

    /// PDU size negotiated on the current connection.
    pub fn pdu_size(&self) -> u16 {
        self.pdu_size
    }

    fn next_pdu_ref(&mut self) -> u16 {
        self.pdu_ref = self.pdu_ref.wrapping_add(1);
        self.pdu_ref
    }

    async fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, ControllerError> {
        let stream = self.stream.as_mut().ok_or(ControllerError::NotConnected)?;
        stream.write_all(request).await?;

        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await?;
        let len = s7::tpkt_length(&header)?;

        let mut frame = vec![0u8; len];
        frame[..4].copy_from_slice(&header);
        stream.read_exact(&mut frame[4..]).await?;
        Ok(frame)
    }

    async fn handshake(&mut self) -> Result<(), ControllerError> {
        let confirm = self
            .exchange(&s7::connection_request(self.endpoint.rack, self.endpoint.slot))
            .await?;
        s7::parse_connection_confirm(&confirm)?;

        let pdu_ref = self.next_pdu_ref();
        let setup = self
            .exchange(&s7::setup_communication(pdu_ref, s7::REQUESTED_PDU_SIZE))
            .await?;
        let negotiated = s7::parse_setup_response(&setup)?;
        s7::max_write_chunk(negotiated)?;
        self.pdu_size = negotiated;
        Ok(())
    }
}

#[async_trait]
impl ControllerTransport for S7Controller {
    async fn open(&mut self) -> Result<(), ControllerError> {
        self.stream = None;
        let stream =
            TcpStream::connect((self.endpoint.address.as_str(), self.endpoint.port)).await?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);

        if let Err(e) = self.handshake().await {
            self.stream = None;
            return Err(e);
        }

        Ok(())
    }

    async fn close(&mut self) -> Result<(), ControllerError> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }

    async fn write(&mut self, block: u16, offset: u32, data: &[u8]) -> Result<(), ControllerError> {
        let chunk_size = s7::max_write_chunk(self.pdu_size)?;

        let mut address = offset;
        for chunk in data.chunks(chunk_size) {
            let pdu_ref = self.next_pdu_ref();
            let request = s7::write_var_request(pdu_ref, block, address, chunk)?;
            let response = self.exchange(&request).await?;
            s7::parse_write_response(&response).map_err(|e| match e {
                S7Error::WriteRejected { .. } => ControllerError::Rejected(e.to_string()),
                other => ControllerError::Protocol(other),
            })?;
            address += chunk.len() as u32;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "S7 {}:{} rack {} slot {}",
            self.endpoint.address, self.endpoint.port, self.endpoint.rack, self.endpoint.slot
        )
    }
}

/// Largest data block the simulated controller accepts.
pub const SIMULATED_BLOCK_SIZE: usize = 65_536;

/// One write observed by the simulated controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub block: u16,
    pub offset: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
struct SimulatedState {
    blocks: HashMap<u16, Vec<u8>>,
    writes: Vec<WriteRecord>,
    failing_opens: usize,
    failing_writes: usize,
    opens: usize,
    closes: usize,
    open: bool,
}

/// In-memory controller.
///
/// Clones share state, so a test can keep one handle for inspection and
/// fault injection while the writer owns another.
#[derive(Debug, Clone, Default)]
pub struct SimulatedController {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` opens fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.lock().failing_opens = count;
    }

    /// Make the next `count` writes fail with an I/O error.
    pub fn fail_next_writes(&self, count: usize) {
        self.lock().failing_writes = count;
    }

    /// Contents of a data block (empty if never written).
    pub fn block(&self, block: u16) -> Vec<u8> {
        self.lock().blocks.get(&block).cloned().unwrap_or_default()
    }

    /// Successful writes, in order.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    pub fn open_count(&self) -> usize {
        self.lock().opens
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ControllerTransport for SimulatedController {
    async fn open(&mut self) -> Result<(), ControllerError> {
        let mut state = self.lock();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(
                io::Error::new(io::ErrorKind::ConnectionRefused, "simulated open failure").into(),
            );
        }
        state.opens += 1;
        state.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ControllerError> {
        let mut state = self.lock();
        if state.open {
            state.closes += 1;
        }
        state.open = false;
        Ok(())
    }

    async fn write(&mut self, block: u16, offset: u32, data: &[u8]) -> Result<(), ControllerError> {
        let mut state = self.lock();
        if !state.open {
            return Err(ControllerError::NotConnected);
        }
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated write failure").into());
        }

        let start = offset as usize;
        let end = start + data.len();
        if end > SIMULATED_BLOCK_SIZE {
            return Err(ControllerError::Rejected(format!(
                "DB{block}.DBB{offset} + {} bytes is beyond the block",
                data.len()
            )));
        }

        let memory = state.blocks.entry(block).or_default();
        if memory.len() < end {
            memory.resize(end, 0);
        }
        memory[start..end].copy_from_slice(data);
        state.writes.push(WriteRecord {
            block,
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn describe(&self) -> String {
        "simulated controller".to_string()
    }
}

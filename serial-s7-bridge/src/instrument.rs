//! Instrument side transports: a real serial line and a simulated one.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_serial::SerialStream;

/// Response terminator used by the instruments.
pub const TERMINATOR: u8 = b'\r';

/// Line-oriented link to an instrument.
///
/// Implementations do not apply timeouts; the poller bounds every call.
#[async_trait]
pub trait InstrumentTransport: Send + Sync {
    async fn open(&mut self) -> io::Result<()>;

    async fn close(&mut self) -> io::Result<()>;

    /// Write `text` verbatim.
    async fn send(&mut self, text: &str) -> io::Result<()>;

    /// Read one response line, terminator included.
    async fn receive(&mut self) -> io::Result<String>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Serial parity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialEndpoint {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
    pub port: String,
    /// Baud rate (default: 9600)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bits, 5-8 (default: 8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Parity (default: none)
    #[serde(default)]
    pub parity: Parity,
    /// Stop bits: 1 or 2 (default: 1)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

impl SerialEndpoint {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            data_bits: default_data_bits(),
            parity: Parity::None,
            stop_bits: default_stop_bits(),
        }
    }

    fn builder(&self) -> tokio_serial::SerialPortBuilder {
        let parity = match self.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        };

        let stop_bits = match self.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        let data_bits = match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };

        tokio_serial::new(&self.port, self.baud_rate)
            .parity(parity)
            .stop_bits(stop_bits)
            .data_bits(data_bits)
            .flow_control(tokio_serial::FlowControl::None)
    }
}

/// Instrument on a serial port, responses terminated by CR.
pub struct SerialInstrument {
    endpoint: SerialEndpoint,
    stream: Option<BufReader<SerialStream>>,
}

impl SerialInstrument {
    pub fn new(endpoint: SerialEndpoint) -> Self {
        Self {
            endpoint,
            stream: None,
        }
    }

    fn stream(&mut self) -> io::Result<&mut BufReader<SerialStream>> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port is not open"))
    }
}

#[async_trait]
impl InstrumentTransport for SerialInstrument {
    async fn open(&mut self) -> io::Result<()> {
        // Re-open always starts from a clean line.
        self.stream = None;
        let serial = SerialStream::open(&self.endpoint.builder()).map_err(io::Error::other)?;
        self.stream = Some(BufReader::new(serial));
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.get_mut().shutdown().await?;
        }
        Ok(())
    }

    async fn send(&mut self, text: &str) -> io::Result<()> {
        let port = self.stream()?.get_mut();
        port.write_all(text.as_bytes()).await?;
        port.flush().await
    }

    async fn receive(&mut self) -> io::Result<String> {
        let reader = self.stream()?;
        let mut line = Vec::with_capacity(32);
        let read = reader.read_until(TERMINATOR, &mut line).await?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "serial port closed",
            ));
        }
        Ok(decode_line(&line))
    }

    fn describe(&self) -> String {
        format!("serial {} @ {} baud", self.endpoint.port, self.endpoint.baud_rate)
    }
}

/// Lines are CR terminated; a LF left over from a previous CR LF pair shows
/// up at the start of the next line and is dropped.
fn decode_line(raw: &[u8]) -> String {
    let start = raw.iter().position(|b| *b != b'\n').unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[start..]).into_owned()
}

/// Settings for the simulated instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedEndpoint {
    /// Canned answers keyed by the exact command text.
    #[serde(default = "default_responses")]
    pub responses: HashMap<String, String>,
    /// Delay before each answer.
    #[serde(default = "default_response_delay_ms")]
    pub delay_ms: u64,
}

fn default_responses() -> HashMap<String, String> {
    HashMap::from([
        ("RT\r".to_string(), "20.0C\r".to_string()),
        ("RUFS\r".to_string(), "0 0 0 13 64 128 192 255\r".to_string()),
    ])
}

fn default_response_delay_ms() -> u64 {
    100
}

impl Default for SimulatedEndpoint {
    fn default() -> Self {
        Self {
            responses: default_responses(),
            delay_ms: default_response_delay_ms(),
        }
    }
}

/// In-process instrument answering from a lookup table.
///
/// Unknown commands get `"ERR\r"`. A `receive` with nothing sent never
/// completes, like a silent line.
#[derive(Debug, Clone)]
pub struct SimulatedInstrument {
    responses: HashMap<String, String>,
    delay: Duration,
    last_sent: Option<String>,
    open: bool,
}

impl SimulatedInstrument {
    pub fn new(endpoint: SimulatedEndpoint) -> Self {
        Self {
            responses: endpoint.responses,
            delay: Duration::from_millis(endpoint.delay_ms),
            last_sent: None,
            open: false,
        }
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotConnected, "simulated instrument is closed"))
        }
    }
}

impl Default for SimulatedInstrument {
    fn default() -> Self {
        Self::new(SimulatedEndpoint::default())
    }
}

#[async_trait]
impl InstrumentTransport for SimulatedInstrument {
    async fn open(&mut self) -> io::Result<()> {
        self.open = true;
        self.last_sent = None;
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.open = false;
        Ok(())
    }

    async fn send(&mut self, text: &str) -> io::Result<()> {
        self.ensure_open()?;
        self.last_sent = Some(text.to_string());
        Ok(())
    }

    async fn receive(&mut self) -> io::Result<String> {
        self.ensure_open()?;
        let Some(command) = self.last_sent.take() else {
            return std::future::pending().await;
        };

        tokio::time::sleep(self.delay).await;
        Ok(self
            .responses
            .get(&command)
            .cloned()
            .unwrap_or_else(|| "ERR\r".to_string()))
    }

    fn describe(&self) -> String {
        format!("simulated instrument ({} responses)", self.responses.len())
    }
}

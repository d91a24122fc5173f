//! Shared-memory interface descriptor
//!
//! Builds the VILLAS `shmem` node configuration from the live state of an
//! interface object:
//!
//! ```text
//! { type: "shmem",
//!   out: { name: <write channel> },
//!   in:  { name: <read channel>, signals: [...] },
//!   polling: bool, queuelen: n, samplelen: n }
//! ```

use crate::error::{Result, ShmemError};
use serde::{Deserialize, Serialize};

/// Truthiness of a raw flag value
///
/// Zero, empty and `None` are false, everything else is true.
pub trait Truthy {
    fn is_truthy(&self) -> bool;
}

impl Truthy for bool {
    #[inline]
    fn is_truthy(&self) -> bool {
        *self
    }
}

macro_rules! impl_truthy_int {
    ($($t:ty),*) => {
        $(
            impl Truthy for $t {
                #[inline]
                fn is_truthy(&self) -> bool {
                    *self != 0
                }
            }
        )*
    };
}

impl_truthy_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl Truthy for f32 {
    #[inline]
    fn is_truthy(&self) -> bool {
        *self != 0.0
    }
}

impl Truthy for f64 {
    #[inline]
    fn is_truthy(&self) -> bool {
        *self != 0.0
    }
}

impl Truthy for str {
    #[inline]
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl Truthy for String {
    #[inline]
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl<T: Truthy + ?Sized> Truthy for &T {
    #[inline]
    fn is_truthy(&self) -> bool {
        (**self).is_truthy()
    }
}

impl<T: Truthy> Truthy for Option<T> {
    #[inline]
    fn is_truthy(&self) -> bool {
        self.as_ref().map_or(false, Truthy::is_truthy)
    }
}

/// Capability contract of an object that owns a shmem interface
///
/// Every accessor returns `None` when the owner cannot currently supply the
/// field.
pub trait ShmemInterface {
    /// Raw representation of the polling flag
    type Polling: Truthy;

    /// Channel the consumer reads from (simulator output)
    fn read_channel_name(&self) -> Option<&str>;

    /// Channel the consumer writes to (simulator input)
    fn write_channel_name(&self) -> Option<&str>;

    /// Exported signal names in frame order
    fn exported_signals(&self) -> Option<Vec<String>>;

    fn polling(&self) -> Option<Self::Polling>;

    /// Queue capacity in samples
    fn queue_len(&self) -> Option<usize>;

    /// Values per sample
    fn sample_len(&self) -> Option<usize>;
}

/// Snapshot of a shmem interface, ready to hand to a VILLAS node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ShmemNode", try_from = "ShmemNode")]
pub struct InterfaceConfig {
    read_channel_name: String,
    write_channel_name: String,
    exported_signals: Vec<String>,
    polling: bool,
    queue_len: usize,
    sample_len: usize,
}

impl InterfaceConfig {
    /// Build a config directly, checking the channel name invariants
    pub fn new(
        read_channel_name: impl Into<String>,
        write_channel_name: impl Into<String>,
        exported_signals: Vec<String>,
        polling: bool,
        queue_len: usize,
        sample_len: usize,
    ) -> Result<Self> {
        let read_channel_name = read_channel_name.into();
        let write_channel_name = write_channel_name.into();
        check_channel_names(&read_channel_name, &write_channel_name)?;

        Ok(Self {
            read_channel_name,
            write_channel_name,
            exported_signals,
            polling,
            queue_len,
            sample_len,
        })
    }

    #[inline]
    pub fn read_channel_name(&self) -> &str {
        &self.read_channel_name
    }

    #[inline]
    pub fn write_channel_name(&self) -> &str {
        &self.write_channel_name
    }

    #[inline]
    pub fn exported_signals(&self) -> &[String] {
        &self.exported_signals
    }

    #[inline]
    pub fn polling(&self) -> bool {
        self.polling
    }

    #[inline]
    pub fn queue_len(&self) -> usize {
        self.queue_len
    }

    #[inline]
    pub fn sample_len(&self) -> usize {
        self.sample_len
    }

    /// Compact JSON form of the node configuration
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Pretty-printed JSON form of the node configuration
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a node configuration, re-validating the channel names
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Describe an interface as a VILLAS `shmem` node configuration
///
/// This is a pure read of `iface`. The polling flag is normalized to a strict
/// boolean here, once.
pub fn describe_interface<I: ShmemInterface + ?Sized>(iface: &I) -> Result<InterfaceConfig> {
    let read = required(iface.read_channel_name(), "read channel name")?;
    let write = required(iface.write_channel_name(), "write channel name")?;
    check_channel_names(read, write)?;

    let exported_signals = required(iface.exported_signals(), "exported signals")?;
    let polling = required(iface.polling(), "polling flag")?.is_truthy();
    let queue_len = required(iface.queue_len(), "queue length")?;
    let sample_len = required(iface.sample_len(), "sample length")?;

    Ok(InterfaceConfig {
        read_channel_name: read.to_owned(),
        write_channel_name: write.to_owned(),
        exported_signals,
        polling,
        queue_len,
        sample_len,
    })
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T> {
    value.ok_or(ShmemError::InvalidInterfaceState {
        field,
        reason: "is not available",
    })
}

fn check_channel_names(read: &str, write: &str) -> Result<()> {
    if read.is_empty() {
        return Err(ShmemError::InvalidInterfaceState {
            field: "read channel name",
            reason: "is empty",
        });
    }
    if write.is_empty() {
        return Err(ShmemError::InvalidInterfaceState {
            field: "write channel name",
            reason: "is empty",
        });
    }
    if read == write {
        return Err(ShmemError::InvalidInterfaceState {
            field: "write channel name",
            reason: "is identical to the read channel name",
        });
    }
    Ok(())
}

// Wire layout of the node configuration. Field order is the serialization order.

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum NodeType {
    Shmem,
}

#[derive(Serialize, Deserialize)]
struct OutChannel {
    name: String,
}

#[derive(Serialize, Deserialize)]
struct InChannel {
    name: String,
    signals: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct ShmemNode {
    #[serde(rename = "type")]
    node_type: NodeType,
    out: OutChannel,
    #[serde(rename = "in")]
    input: InChannel,
    polling: bool,
    queuelen: usize,
    samplelen: usize,
}

impl From<InterfaceConfig> for ShmemNode {
    fn from(config: InterfaceConfig) -> Self {
        Self {
            node_type: NodeType::Shmem,
            out: OutChannel {
                name: config.write_channel_name,
            },
            input: InChannel {
                name: config.read_channel_name,
                signals: config.exported_signals,
            },
            polling: config.polling,
            queuelen: config.queue_len,
            samplelen: config.sample_len,
        }
    }
}

impl TryFrom<ShmemNode> for InterfaceConfig {
    type Error = ShmemError;

    fn try_from(node: ShmemNode) -> Result<Self> {
        InterfaceConfig::new(
            node.input.name,
            node.out.name,
            node.input.signals,
            node.polling,
            node.queuelen,
            node.samplelen,
        )
    }
}

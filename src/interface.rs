//! Simulator-owned shmem interface object

use crate::channel::{SampleReader, SampleWriter, SimulatorChannels};
use crate::descriptor::{describe_interface, InterfaceConfig, ShmemInterface};
use crate::error::{Result, ShmemError};
use crate::shm::validate_name;
use crate::signal::{check_range, AttributeMode, Export, Import};

/// Default queue length in samples
pub const DEFAULT_QUEUE_LEN: usize = 512;

/// Default number of values per sample
pub const DEFAULT_SAMPLE_LEN: usize = 64;

/// Interface options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceOptions {
    /// Capacity of each queue in samples
    pub queue_len: usize,
    /// Values per sample; must cover the highest mapped slot
    pub sample_len: usize,
    /// Consumers poll instead of waiting for new samples
    pub polling: bool,
}

impl Default for InterfaceOptions {
    fn default() -> Self {
        Self {
            queue_len: DEFAULT_QUEUE_LEN,
            sample_len: DEFAULT_SAMPLE_LEN,
            polling: false,
        }
    }
}

/// A simulator's connection to an external program over two shm queues
///
/// Exported attributes are written to the read channel every step; imported
/// attributes are taken from the write channel. Slot indices are positions
/// inside a sample and must be agreed on with the other side.
#[derive(Debug, Clone)]
pub struct Interface {
    read_channel: String,
    write_channel: String,
    options: InterfaceOptions,
    exports: Vec<Export>,
    imports: Vec<Import>,
}

impl Interface {
    /// Create an interface; no shared memory is touched yet
    ///
    /// `read_channel` carries the simulator's output, `write_channel` its
    /// input. Both must be distinct POSIX shm names such as `/villas0-in`.
    pub fn new(
        read_channel: impl Into<String>,
        write_channel: impl Into<String>,
        options: InterfaceOptions,
    ) -> Result<Self> {
        let read_channel = read_channel.into();
        let write_channel = write_channel.into();

        validate_name(&read_channel)?;
        validate_name(&write_channel)?;
        if read_channel == write_channel {
            return Err(ShmemError::InvalidChannelName {
                name: write_channel,
                reason: "is identical to the read channel",
            });
        }

        Ok(Self {
            read_channel,
            write_channel,
            options,
            exports: Vec::new(),
            imports: Vec::new(),
        })
    }

    /// Register an attribute to be written to the read channel every step
    pub fn export_attribute(
        &mut self,
        attribute: impl Into<String>,
        idx: usize,
        mode: AttributeMode,
        gain: f64,
    ) -> Result<()> {
        check_slots(
            self.options.sample_len,
            idx,
            mode,
            self.exports.iter().map(|e| (e.attribute(), e.slots())),
        )?;
        let export = Export::new(attribute, idx, mode, gain);

        // Keep slot order so signal names line up with frame positions
        let pos = self.exports.partition_point(|e| e.idx() < idx);
        self.exports.insert(pos, export);
        Ok(())
    }

    /// Register an attribute to be updated from the write channel every step
    pub fn import_attribute(
        &mut self,
        attribute: impl Into<String>,
        idx: usize,
        mode: AttributeMode,
        gain: f64,
    ) -> Result<()> {
        check_slots(
            self.options.sample_len,
            idx,
            mode,
            self.imports.iter().map(|i| (i.attribute(), i.slots())),
        )?;
        let import = Import::new(attribute, idx, mode, gain);

        let pos = self.imports.partition_point(|i| i.idx() < idx);
        self.imports.insert(pos, import);
        Ok(())
    }

    #[inline]
    pub fn read_channel(&self) -> &str {
        &self.read_channel
    }

    #[inline]
    pub fn write_channel(&self) -> &str {
        &self.write_channel
    }

    #[inline]
    pub fn options(&self) -> &InterfaceOptions {
        &self.options
    }

    /// Exports ordered by slot
    pub fn exports(&self) -> &[Export] {
        &self.exports
    }

    /// Imports ordered by slot
    pub fn imports(&self) -> &[Import] {
        &self.imports
    }

    /// VILLAS node configuration for the current state of this interface
    pub fn describe(&self) -> Result<InterfaceConfig> {
        describe_interface(self)
    }

    /// Create both shared memory queues
    ///
    /// The queues live as long as the returned channels; a consumer attaches
    /// with [`crate::ShmemTransport::connect`].
    pub fn open_channels(&self) -> Result<SimulatorChannels> {
        let InterfaceOptions {
            queue_len,
            sample_len,
            polling,
        } = self.options;

        let output = SampleWriter::create(&self.read_channel, queue_len, sample_len)?;
        let input = SampleReader::create(&self.write_channel, queue_len, sample_len, polling)?;

        tracing::debug!(
            read_channel = %self.read_channel,
            write_channel = %self.write_channel,
            exports = self.exports.len(),
            imports = self.imports.len(),
            "opened interface channels"
        );

        Ok(SimulatorChannels::new(
            self.exports.clone(),
            self.imports.clone(),
            output,
            input,
        ))
    }
}

fn check_slots<'a>(
    sample_len: usize,
    idx: usize,
    mode: AttributeMode,
    taken: impl Iterator<Item = (&'a str, std::ops::Range<usize>)>,
) -> Result<()> {
    let slots = check_range(idx, mode, sample_len)?;

    for (attribute, other) in taken {
        if slots.start < other.end && other.start < slots.end {
            return Err(ShmemError::SlotConflict {
                idx: slots.start.max(other.start),
                attribute: attribute.to_string(),
            });
        }
    }
    Ok(())
}

impl ShmemInterface for Interface {
    type Polling = bool;

    fn read_channel_name(&self) -> Option<&str> {
        Some(&self.read_channel)
    }

    fn write_channel_name(&self) -> Option<&str> {
        Some(&self.write_channel)
    }

    fn exported_signals(&self) -> Option<Vec<String>> {
        Some(self.exports.iter().flat_map(|e| e.signal_names()).collect())
    }

    fn polling(&self) -> Option<bool> {
        Some(self.options.polling)
    }

    fn queue_len(&self) -> Option<usize> {
        Some(self.options.queue_len)
    }

    fn sample_len(&self) -> Option<usize> {
        Some(self.options.sample_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn interface() -> Interface {
        Interface::new("/villas0-out", "/villas0-in", InterfaceOptions::default()).unwrap()
    }

    #[test]
    fn test_default_options() {
        let options = InterfaceOptions::default();
        assert_eq!(options.queue_len, 512);
        assert_eq!(options.sample_len, 64);
        assert!(!options.polling);
    }

    #[test]
    fn test_rejects_bad_channel_names() {
        let options = InterfaceOptions::default();
        assert!(Interface::new("villas0-out", "/villas0-in", options).is_err());
        assert!(Interface::new("/villas0", "", options).is_err());
        assert!(matches!(
            Interface::new("/villas0", "/villas0", options),
            Err(ShmemError::InvalidChannelName { .. })
        ));
    }

    #[test]
    fn test_signals_follow_slot_order() {
        let mut iface = interface();
        iface.export_attribute("v_t.comp_current", 2, AttributeMode::Complex, 1.0).unwrap();
        iface.export_attribute("n1.voltage", 0, AttributeMode::Real, 1.0).unwrap();
        iface.export_attribute("n2.voltage", 4, AttributeMode::Polar, 1.0).unwrap();

        let config = iface.describe().unwrap();
        assert_eq!(
            config.exported_signals(),
            [
                "n1.voltage",
                "v_t.comp_current.real",
                "v_t.comp_current.imag",
                "n2.voltage.mag",
                "n2.voltage.phase",
            ]
        );
    }

    #[test]
    fn test_describe_node_layout() {
        let options = InterfaceOptions {
            queue_len: 1024,
            sample_len: 4,
            polling: true,
        };
        let mut iface = Interface::new("/villas1-out", "/villas1-in", options).unwrap();
        iface.export_attribute("ecs.comp_voltage", 0, AttributeMode::Complex, 1.0).unwrap();
        iface.import_attribute("ecs.current_ref", 0, AttributeMode::Complex, 1.0).unwrap();

        let value = serde_json::to_value(iface.describe().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "shmem",
                "out": { "name": "/villas1-in" },
                "in": {
                    "name": "/villas1-out",
                    "signals": ["ecs.comp_voltage.real", "ecs.comp_voltage.imag"]
                },
                "polling": true,
                "queuelen": 1024,
                "samplelen": 4
            })
        );
    }

    #[test]
    fn test_out_of_range_slots_rejected() {
        let options = InterfaceOptions {
            sample_len: 2,
            ..InterfaceOptions::default()
        };
        let mut iface = Interface::new("/a", "/b", options).unwrap();

        assert!(iface.export_attribute("x", 1, AttributeMode::Real, 1.0).is_ok());
        assert!(matches!(
            iface.export_attribute("y", 1, AttributeMode::Complex, 1.0),
            Err(ShmemError::IndexOutOfRange { idx: 1, width: 2, sample_len: 2 })
        ));
        assert!(iface.import_attribute("z", 2, AttributeMode::Real, 1.0).is_err());
    }

    #[test]
    fn test_huge_slot_index_rejected() {
        let options = InterfaceOptions {
            sample_len: usize::MAX,
            ..InterfaceOptions::default()
        };
        let mut iface = Interface::new("/a", "/b", options).unwrap();

        assert!(matches!(
            iface.export_attribute("x", usize::MAX, AttributeMode::Real, 1.0),
            Err(ShmemError::IndexOutOfRange { idx: usize::MAX, width: 1, .. })
        ));
        assert!(matches!(
            iface.import_attribute("y", usize::MAX - 1, AttributeMode::Complex, 1.0),
            Err(ShmemError::IndexOutOfRange { width: 2, .. })
        ));
        assert!(iface.exports().is_empty());
        assert!(iface.imports().is_empty());
    }

    #[test]
    fn test_overlapping_slots_rejected() {
        let mut iface = interface();
        iface.export_attribute("a", 0, AttributeMode::Complex, 1.0).unwrap();

        let err = iface.export_attribute("b", 1, AttributeMode::Real, 1.0).unwrap_err();
        assert!(matches!(err, ShmemError::SlotConflict { idx: 1, .. }));

        // Imports use their own slot space
        iface.import_attribute("b", 1, AttributeMode::Real, 1.0).unwrap();
        assert_eq!(iface.exports().len(), 1);
        assert_eq!(iface.imports().len(), 1);
    }

    #[test]
    fn test_describe_reflects_later_registrations() {
        let mut iface = interface();
        let before = iface.describe().unwrap();
        iface.export_attribute("a", 0, AttributeMode::Real, 1.0).unwrap();
        let after = iface.describe().unwrap();

        assert!(before.exported_signals().is_empty());
        assert_eq!(after.exported_signals(), ["a"]);
    }
}

//! High-level channel API
//!
//! The simulator owns both queues ([`SimulatorChannels`]); the consumer
//! attaches to them from a descriptor ([`ShmemTransport`]). Each queue has
//! exactly one [`SampleWriter`] and one [`SampleReader`].

use crate::descriptor::InterfaceConfig;
use crate::error::{Result, ShmemError};
use crate::queue::{Sample, SampleQueue};
use crate::signal::{AttributeValue, Export, Import};

/// Spins before a blocking reader starts yielding its time slice
const SPIN_LIMIT: u32 = 128;

/// Writer side of a sample queue
///
/// Only one thread may send at a time; the writer can be moved but not shared.
///
/// ```compile_fail
/// fn shared<T: Sync>() {}
/// shared::<villas_shmem::SampleWriter>();
/// ```
pub struct SampleWriter {
    queue: SampleQueue,
}

impl SampleWriter {
    /// Create a queue and become its writer
    pub fn create(name: &str, queue_len: usize, sample_len: usize) -> Result<Self> {
        let queue = SampleQueue::create(name, queue_len, sample_len)?;
        Ok(Self { queue })
    }

    /// Become the writer of an existing queue
    pub fn attach(name: &str) -> Result<Self> {
        let queue = SampleQueue::attach(name)?;
        queue.reopen();
        Ok(Self { queue })
    }

    /// Send one sample
    ///
    /// Returns the sample's sequence number. Fails with `QueueFull` when the
    /// reader is a full queue behind.
    #[inline]
    pub fn send(&self, values: &[f64]) -> Result<u64> {
        self.queue.push(values)
    }

    #[inline]
    pub fn sample_len(&self) -> usize {
        self.queue.sample_len()
    }

    #[inline]
    pub fn queue_len(&self) -> usize {
        self.queue.queue_len()
    }

    pub fn name(&self) -> &str {
        self.queue.name()
    }
}

impl Drop for SampleWriter {
    fn drop(&mut self) {
        self.queue.close();
    }
}

/// Reader side of a sample queue
///
/// ```compile_fail
/// fn shared<T: Sync>() {}
/// shared::<villas_shmem::SampleReader>();
/// ```
pub struct SampleReader {
    queue: SampleQueue,
    polling: bool,
}

impl SampleReader {
    /// Create a queue and become its reader
    pub fn create(name: &str, queue_len: usize, sample_len: usize, polling: bool) -> Result<Self> {
        let queue = SampleQueue::create(name, queue_len, sample_len)?;
        Ok(Self { queue, polling })
    }

    /// Become the reader of an existing queue
    pub fn attach(name: &str, polling: bool) -> Result<Self> {
        let queue = SampleQueue::attach(name)?;
        Ok(Self { queue, polling })
    }

    /// Receive the next sample
    ///
    /// In polling mode this returns `Ok(None)` right away when nothing is
    /// queued. Otherwise it waits until a sample arrives. Both modes fail
    /// with `ChannelClosed` once the queue is drained and its writer is gone.
    pub fn recv(&self) -> Result<Option<Sample>> {
        if self.polling {
            return self.try_recv();
        }

        let mut spins = 0u32;
        loop {
            if let Some(sample) = self.try_recv()? {
                return Ok(Some(sample));
            }

            if spins < SPIN_LIMIT {
                spins += 1;
                core::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// Receive the next sample without waiting
    pub fn try_recv(&self) -> Result<Option<Sample>> {
        if let Some(sample) = self.queue.pop() {
            return Ok(Some(sample));
        }

        if self.queue.is_closed() {
            // A sample may have landed between the pop and the closed check
            return match self.queue.pop() {
                Some(sample) => Ok(Some(sample)),
                None => Err(ShmemError::ChannelClosed(self.queue.name().to_string())),
            };
        }

        Ok(None)
    }

    /// Whether `recv` polls instead of waiting
    #[inline]
    pub fn is_polling(&self) -> bool {
        self.polling
    }

    #[inline]
    pub fn sample_len(&self) -> usize {
        self.queue.sample_len()
    }

    #[inline]
    pub fn queue_len(&self) -> usize {
        self.queue.queue_len()
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn name(&self) -> &str {
        self.queue.name()
    }
}

/// Simulator side of an interface: owns both shared memory queues
pub struct SimulatorChannels {
    exports: Vec<Export>,
    imports: Vec<Import>,
    /// Simulator output, read by the consumer
    output: SampleWriter,
    /// Simulator input, written by the consumer
    input: SampleReader,
}

impl SimulatorChannels {
    pub(crate) fn new(
        exports: Vec<Export>,
        imports: Vec<Import>,
        output: SampleWriter,
        input: SampleReader,
    ) -> Self {
        Self {
            exports,
            imports,
            output,
            input,
        }
    }

    /// Send a raw frame on the read channel
    #[inline]
    pub fn send(&self, values: &[f64]) -> Result<u64> {
        self.output.send(values)
    }

    /// Receive a raw frame from the write channel, honoring the polling mode
    #[inline]
    pub fn recv(&self) -> Result<Option<Sample>> {
        self.input.recv()
    }

    /// Build a frame from the current export values and send it
    ///
    /// `value_of` is asked once per registered export. Unmapped slots are 0.
    pub fn publish<F>(&self, mut value_of: F) -> Result<u64>
    where
        F: FnMut(&Export) -> AttributeValue,
    {
        let mut frame = vec![0.0; self.output.sample_len()];
        for export in &self.exports {
            export.write_into(value_of(export), &mut frame)?;
        }
        self.output.send(&frame)
    }

    /// Receive a frame and hand every import its decoded value
    ///
    /// Returns `Ok(false)` when polling found nothing to apply.
    pub fn apply_imports<F>(&self, mut apply: F) -> Result<bool>
    where
        F: FnMut(&Import, AttributeValue),
    {
        let Some(sample) = self.input.recv()? else {
            return Ok(false);
        };

        for import in &self.imports {
            apply(import, import.read_from(&sample.values)?);
        }
        Ok(true)
    }

    pub fn exports(&self) -> &[Export] {
        &self.exports
    }

    pub fn imports(&self) -> &[Import] {
        &self.imports
    }
}

/// Consumer side of an interface, attached from its descriptor
pub struct ShmemTransport {
    config: InterfaceConfig,
    /// Reads `in.name`
    input: SampleReader,
    /// Writes `out.name`
    output: SampleWriter,
}

impl ShmemTransport {
    /// Attach to both queues named by `config`
    ///
    /// The simulator must have opened its channels first.
    pub fn connect(config: &InterfaceConfig) -> Result<Self> {
        let input = SampleReader::attach(config.read_channel_name(), config.polling())?;
        check_shape(config, input.name(), input.queue_len(), input.sample_len())?;

        let output = SampleWriter::attach(config.write_channel_name())?;
        check_shape(config, output.name(), output.queue_len(), output.sample_len())?;

        tracing::debug!(
            input = config.read_channel_name(),
            output = config.write_channel_name(),
            polling = config.polling(),
            "shmem transport connected"
        );

        Ok(Self {
            config: config.clone(),
            input,
            output,
        })
    }

    /// Receive the next simulator sample, honoring the polling mode
    #[inline]
    pub fn recv(&self) -> Result<Option<Sample>> {
        self.input.recv()
    }

    #[inline]
    pub fn try_recv(&self) -> Result<Option<Sample>> {
        self.input.try_recv()
    }

    /// Send a sample to the simulator
    #[inline]
    pub fn send(&self, values: &[f64]) -> Result<u64> {
        self.output.send(values)
    }

    /// Names of the values in each received sample, by position
    pub fn signals(&self) -> &[String] {
        self.config.exported_signals()
    }

    pub fn config(&self) -> &InterfaceConfig {
        &self.config
    }
}

fn check_shape(config: &InterfaceConfig, name: &str, queue_len: usize, sample_len: usize) -> Result<()> {
    if queue_len != config.queue_len() {
        return Err(ShmemError::QueueLengthMismatch {
            name: name.to_string(),
            expected: config.queue_len(),
            got: queue_len,
        });
    }
    if sample_len != config.sample_len() {
        return Err(ShmemError::SampleLengthMismatch {
            name: name.to_string(),
            expected: config.sample_len(),
            got: sample_len,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_polling_reader_returns_immediately() {
        let name = "/villas_test_channel_poll";
        let _writer = SampleWriter::create(name, 4, 2).unwrap();
        let reader = SampleReader::attach(name, true).unwrap();

        assert!(reader.is_polling());
        assert!(reader.recv().unwrap().is_none());
    }

    #[test]
    fn test_blocking_reader_wakes_on_sample() {
        let name = "/villas_test_channel_block";
        let writer = SampleWriter::create(name, 4, 1).unwrap();
        let reader = SampleReader::attach(name, false).unwrap();

        let handle = thread::spawn(move || reader.recv().unwrap());

        thread::sleep(Duration::from_millis(20));
        writer.send(&[7.0]).unwrap();

        let sample = handle.join().unwrap().unwrap();
        assert_eq!(sample.values, vec![7.0]);
    }

    #[test]
    fn test_reader_drains_then_reports_close() {
        let name = "/villas_test_channel_close";
        let reader = SampleReader::create(name, 4, 1, false).unwrap();
        let writer = SampleWriter::attach(name).unwrap();

        writer.send(&[1.0]).unwrap();
        drop(writer);

        assert_eq!(reader.recv().unwrap().unwrap().values, vec![1.0]);
        assert!(matches!(reader.recv(), Err(ShmemError::ChannelClosed(_))));
    }

    #[test]
    fn test_endpoints_move_between_threads() {
        fn movable<T: Send>() {}
        movable::<SampleWriter>();
        movable::<SampleReader>();
        movable::<ShmemTransport>();
        movable::<SimulatorChannels>();
    }

    #[test]
    fn test_transport_rejects_shape_mismatch() {
        let read = "/villas_test_channel_mismatch_r";
        let write = "/villas_test_channel_mismatch_w";
        let _out = SampleWriter::create(read, 4, 2).unwrap();
        let _in = SampleReader::create(write, 4, 2, true).unwrap();

        let config = InterfaceConfig::new(read, write, vec![], true, 4, 3).unwrap();
        assert!(matches!(
            ShmemTransport::connect(&config),
            Err(ShmemError::SampleLengthMismatch { expected: 3, got: 2, .. })
        ));

        let config = InterfaceConfig::new(read, write, vec![], true, 8, 2).unwrap();
        assert!(matches!(
            ShmemTransport::connect(&config),
            Err(ShmemError::QueueLengthMismatch { expected: 8, got: 4, .. })
        ));

        let config = InterfaceConfig::new(read, write, vec![], true, 4, 2).unwrap();
        assert!(ShmemTransport::connect(&config).is_ok());
    }
}

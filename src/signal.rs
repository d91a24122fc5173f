//! Mapping of simulator attributes onto sample slots

use crate::error::{Result, ShmemError};

/// How an attribute occupies slots in a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeMode {
    /// Real attribute, one slot
    Real,
    /// Complex attribute as real part at `idx` and imaginary part at `idx + 1`
    Complex,
    /// Complex attribute as magnitude at `idx` and phase at `idx + 1`
    Polar,
}

impl AttributeMode {
    /// Number of slots the attribute occupies
    #[inline]
    pub fn width(self) -> usize {
        match self {
            AttributeMode::Real => 1,
            AttributeMode::Complex | AttributeMode::Polar => 2,
        }
    }

    fn suffixes(self) -> &'static [&'static str] {
        match self {
            AttributeMode::Real => &[""],
            AttributeMode::Complex => &[".real", ".imag"],
            AttributeMode::Polar => &[".mag", ".phase"],
        }
    }

    fn expected_kind(self) -> &'static str {
        match self {
            AttributeMode::Real => "real",
            AttributeMode::Complex | AttributeMode::Polar => "complex",
        }
    }
}

impl TryFrom<i32> for AttributeMode {
    type Error = i32;

    fn try_from(raw: i32) -> std::result::Result<Self, i32> {
        match raw {
            0 => Ok(AttributeMode::Real),
            1 => Ok(AttributeMode::Complex),
            2 => Ok(AttributeMode::Polar),
            other => Err(other),
        }
    }
}

/// Value of a simulator attribute
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttributeValue {
    Real(f64),
    Complex { re: f64, im: f64 },
}

/// Placement of one attribute inside a sample
#[derive(Debug, Clone, PartialEq)]
struct SlotMapping {
    attribute: String,
    idx: usize,
    mode: AttributeMode,
    gain: f64,
}

impl SlotMapping {
    fn slots(&self) -> std::ops::Range<usize> {
        self.idx..self.idx.saturating_add(self.mode.width())
    }

    fn signal_names(&self) -> impl Iterator<Item = String> + '_ {
        self.mode
            .suffixes()
            .iter()
            .map(move |suffix| format!("{}{}", self.attribute, suffix))
    }

    fn check_fits(&self, frame_len: usize) -> Result<()> {
        check_range(self.idx, self.mode, frame_len).map(|_| ())
    }
}

/// Slots covered by an attribute at `idx`, if they all lie within `sample_len`
pub(crate) fn check_range(
    idx: usize,
    mode: AttributeMode,
    sample_len: usize,
) -> Result<std::ops::Range<usize>> {
    match idx.checked_add(mode.width()) {
        Some(end) if end <= sample_len => Ok(idx..end),
        _ => Err(ShmemError::IndexOutOfRange {
            idx,
            width: mode.width(),
            sample_len,
        }),
    }
}

/// Attribute written to the read channel after every step
#[derive(Debug, Clone, PartialEq)]
pub struct Export(SlotMapping);

/// Attribute updated from the write channel before every step
#[derive(Debug, Clone, PartialEq)]
pub struct Import(SlotMapping);

macro_rules! mapping_accessors {
    ($ty:ident) => {
        impl $ty {
            pub fn new(attribute: impl Into<String>, idx: usize, mode: AttributeMode, gain: f64) -> Self {
                Self(SlotMapping {
                    attribute: attribute.into(),
                    idx,
                    mode,
                    gain,
                })
            }

            #[inline]
            pub fn attribute(&self) -> &str {
                &self.0.attribute
            }

            #[inline]
            pub fn idx(&self) -> usize {
                self.0.idx
            }

            #[inline]
            pub fn mode(&self) -> AttributeMode {
                self.0.mode
            }

            #[inline]
            pub fn gain(&self) -> f64 {
                self.0.gain
            }

            /// Slot indices covered by this attribute, clamped at `usize::MAX`
            #[inline]
            pub fn slots(&self) -> std::ops::Range<usize> {
                self.0.slots()
            }

            /// Signal name of every covered slot, in slot order
            pub fn signal_names(&self) -> impl Iterator<Item = String> + '_ {
                self.0.signal_names()
            }
        }
    };
}

mapping_accessors!(Export);
mapping_accessors!(Import);

impl Export {
    /// Write `value` into its slots of `frame`, applying the gain
    pub fn write_into(&self, value: AttributeValue, frame: &mut [f64]) -> Result<()> {
        let m = &self.0;
        m.check_fits(frame.len())?;

        match (m.mode, value) {
            (AttributeMode::Real, AttributeValue::Real(v)) => {
                frame[m.idx] = v * m.gain;
            }
            (AttributeMode::Complex, AttributeValue::Complex { re, im }) => {
                frame[m.idx] = re * m.gain;
                frame[m.idx + 1] = im * m.gain;
            }
            (AttributeMode::Polar, AttributeValue::Complex { re, im }) => {
                frame[m.idx] = re.hypot(im) * m.gain;
                frame[m.idx + 1] = im.atan2(re);
            }
            (mode, _) => {
                return Err(ShmemError::ModeMismatch {
                    attribute: m.attribute.clone(),
                    expected: mode.expected_kind(),
                })
            }
        }
        Ok(())
    }
}

impl Import {
    /// Read the attribute value from its slots of `frame`, applying the gain
    pub fn read_from(&self, frame: &[f64]) -> Result<AttributeValue> {
        let m = &self.0;
        m.check_fits(frame.len())?;

        let value = match m.mode {
            AttributeMode::Real => AttributeValue::Real(frame[m.idx] * m.gain),
            AttributeMode::Complex => AttributeValue::Complex {
                re: frame[m.idx] * m.gain,
                im: frame[m.idx + 1] * m.gain,
            },
            AttributeMode::Polar => {
                let mag = frame[m.idx] * m.gain;
                let (sin, cos) = frame[m.idx + 1].sin_cos();
                AttributeValue::Complex {
                    re: mag * cos,
                    im: mag * sin,
                }
            }
        };
        Ok(value)
    }
}

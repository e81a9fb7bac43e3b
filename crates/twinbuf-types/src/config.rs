//! Configuration types for twinbuf
//!
//! Validated newtypes shared by the I/O engine, the configuration loader and
//! the benchmark harness.

/// Capacity of one buffer slot, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "usize", into = "usize"))]
pub struct BufferSize(usize);

impl BufferSize {
    /// Minimum buffer size
    pub const MIN: usize = 1;
    /// Maximum buffer size (1GB)
    pub const MAX: usize = 1024 * 1024 * 1024;
    /// Default buffer size (64KB)
    pub const DEFAULT: usize = 64 * 1024;

    /// Create a new buffer size with validation
    pub fn new(size: usize) -> Result<Self, String> {
        if size < Self::MIN {
            Err("Buffer size must be greater than zero".to_string())
        } else if size > Self::MAX {
            Err(format!("Buffer size {} exceeds maximum {}", size, Self::MAX))
        } else {
            Ok(Self(size))
        }
    }

    /// Create a buffer size from a count of kibibytes
    pub fn from_kib(kib: usize) -> Result<Self, String> {
        let size = kib
            .checked_mul(1024)
            .ok_or_else(|| format!("Buffer size {} KB overflows", kib))?;
        Self::new(size)
    }

    /// Get the buffer size value
    pub fn get(self) -> usize {
        self.0
    }

    /// Size in whole kibibytes, used for method labels
    pub fn kib(self) -> usize {
        self.0 / 1024
    }

    /// Whether the size is a whole multiple of `alignment`
    pub fn is_multiple_of(self, alignment: Alignment) -> bool {
        self.0 % alignment.get() == 0
    }
}

impl Default for BufferSize {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl TryFrom<usize> for BufferSize {
    type Error = String;

    fn try_from(size: usize) -> Result<Self, Self::Error> {
        Self::new(size)
    }
}

impl From<BufferSize> for usize {
    fn from(size: BufferSize) -> Self {
        size.0
    }
}

/// Alignment of a buffer slot's start address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "usize", into = "usize"))]
pub struct Alignment(usize);

impl Alignment {
    /// Largest supported alignment (2MB, one huge page)
    pub const MAX: usize = 2 * 1024 * 1024;
    /// Page alignment expected by direct I/O on common filesystems
    pub const PAGE: usize = 4096;

    /// Create a new alignment with validation
    pub fn new(align: usize) -> Result<Self, String> {
        if !align.is_power_of_two() {
            Err(format!("Alignment {} must be a power of two", align))
        } else if align > Self::MAX {
            Err(format!("Alignment {} exceeds maximum {}", align, Self::MAX))
        } else {
            Ok(Self(align))
        }
    }

    /// Get the alignment value
    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for Alignment {
    fn default() -> Self {
        Self(Self::PAGE)
    }
}

impl TryFrom<usize> for Alignment {
    type Error = String;

    fn try_from(align: usize) -> Result<Self, Self::Error> {
        Self::new(align)
    }
}

impl From<Alignment> for usize {
    fn from(align: Alignment) -> Self {
        align.0
    }
}

/// Number of timed repetitions per method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u32", into = "u32"))]
pub struct TrialCount(u32);

impl TrialCount {
    /// Minimum trial count
    pub const MIN: u32 = 1;
    /// Maximum trial count
    pub const MAX: u32 = 10_000;
    /// Default trial count
    pub const DEFAULT: u32 = 10;

    /// Create a new trial count with validation
    pub fn new(count: u32) -> Result<Self, String> {
        if count < Self::MIN {
            Err(format!("Trial count {} is below minimum {}", count, Self::MIN))
        } else if count > Self::MAX {
            Err(format!("Trial count {} exceeds maximum {}", count, Self::MAX))
        } else {
            Ok(Self(count))
        }
    }

    /// Get the trial count value
    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for TrialCount {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl TryFrom<u32> for TrialCount {
    type Error = String;

    fn try_from(count: u32) -> Result<Self, Self::Error> {
        Self::new(count)
    }
}

impl From<TrialCount> for u32 {
    fn from(count: TrialCount) -> Self {
        count.0
    }
}

/// How a handshake side waits for its slot to change state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum WaitStrategy {
    /// Pure busy spin on the state word
    #[default]
    Spin,
    /// Spin for a while, then yield the CPU between polls
    Yield,
}

impl std::str::FromStr for WaitStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spin" => Ok(Self::Spin),
            "yield" => Ok(Self::Yield),
            other => Err(format!("Unknown wait strategy '{}'", other)),
        }
    }
}

//! I2C bus communication: trait + Linux backend.

use std::fmt;

// ── Error type ──

/// Bus communication errors.
///
/// String payloads follow the convention **"context: details"** where *context*
/// identifies the operation and register (e.g. `"write OFF_L 0x08"`) and
/// *details* describes what went wrong.
#[derive(Debug)]
pub enum DeviceError {
    /// The bus device node could not be opened.
    OpenFailed(String),
    /// The bus reported a transient busy / communication fault.
    Busy(String),
    /// Any other transfer failure (NACK, timeout, invalid address).
    TransferFailed(String),
    /// No I2C backend exists on this platform.
    Unsupported,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::OpenFailed(e) => write!(f, "Failed to open I2C bus: {e}"),
            DeviceError::Busy(e) => write!(f, "I2C bus busy: {e}"),
            DeviceError::TransferFailed(e) => write!(f, "I2C transfer failed: {e}"),
            DeviceError::Unsupported => write!(f, "I2C is not supported on this platform"),
        }
    }
}

impl std::error::Error for DeviceError {}

impl DeviceError {
    /// Prefix the payload with caller context, e.g. `"controller 2 channel 5"`.
    pub fn context(self, ctx: &str) -> Self {
        match self {
            DeviceError::OpenFailed(e) => DeviceError::OpenFailed(format!("{ctx}: {e}")),
            DeviceError::Busy(e) => DeviceError::Busy(format!("{ctx}: {e}")),
            DeviceError::TransferFailed(e) => DeviceError::TransferFailed(format!("{ctx}: {e}")),
            DeviceError::Unsupported => DeviceError::Unsupported,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, DeviceError::Busy(_))
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;

// ── Traits ──

/// SMBus-style register access on one I2C bus.
///
/// Words are little-endian (low byte at `register`, high byte at
/// `register + 1`), matching SMBus word transfers.
pub trait I2cBus: Send {
    fn write_byte(&mut self, address: u8, register: u8, value: u8) -> Result<()>;
    fn read_byte(&mut self, address: u8, register: u8) -> Result<u8>;
    fn write_word(&mut self, address: u8, register: u8, value: u16) -> Result<()>;
    fn read_word(&mut self, address: u8, register: u8) -> Result<u16>;
}

/// Opens bus handles by device index (`1` → `/dev/i2c-1`).
pub trait BusProvider: Send {
    fn open(&self, bus: u8) -> Result<Box<dyn I2cBus>>;
}

// ── Linux implementation ──

#[cfg(target_os = "linux")]
mod linux_impl {
    use super::*;

    use rppal::i2c::I2c;

    /// `ECOMM`: communication error on send. Reported by some bus drivers
    /// when the slave drops off mid-transfer; transient in practice.
    const ECOMM: i32 = 70;

    pub struct LinuxBus {
        i2c: I2c,
        bus: u8,
        /// Slave address currently selected on the handle.
        selected: Option<u8>,
    }

    impl LinuxBus {
        pub fn open(bus: u8) -> Result<Self> {
            let i2c = I2c::with_bus(bus)
                .map_err(|e| DeviceError::OpenFailed(format!("/dev/i2c-{bus}: {e}")))?;
            log::debug!("opened /dev/i2c-{bus}");
            Ok(LinuxBus {
                i2c,
                bus,
                selected: None,
            })
        }

        fn select(&mut self, address: u8) -> Result<()> {
            if self.selected == Some(address) {
                return Ok(());
            }
            self.i2c
                .set_slave_address(u16::from(address))
                .map_err(|e| classify(&format!("select 0x{address:02X}"), e))?;
            self.selected = Some(address);
            Ok(())
        }
    }

    fn classify(context: &str, e: rppal::i2c::Error) -> DeviceError {
        match e {
            rppal::i2c::Error::Io(io)
                if io.kind() == std::io::ErrorKind::ResourceBusy
                    || io.raw_os_error() == Some(ECOMM) =>
            {
                DeviceError::Busy(format!("{context}: {io}"))
            }
            other => DeviceError::TransferFailed(format!("{context}: {other}")),
        }
    }

    impl I2cBus for LinuxBus {
        fn write_byte(&mut self, address: u8, register: u8, value: u8) -> Result<()> {
            self.select(address)?;
            self.i2c
                .smbus_write_byte(register, value)
                .map_err(|e| classify(&format!("i2c-{} write 0x{register:02X}", self.bus), e))
        }

        fn read_byte(&mut self, address: u8, register: u8) -> Result<u8> {
            self.select(address)?;
            self.i2c
                .smbus_read_byte(register)
                .map_err(|e| classify(&format!("i2c-{} read 0x{register:02X}", self.bus), e))
        }

        fn write_word(&mut self, address: u8, register: u8, value: u16) -> Result<()> {
            self.select(address)?;
            self.i2c
                .smbus_write_word(register, value)
                .map_err(|e| classify(&format!("i2c-{} write 0x{register:02X}", self.bus), e))
        }

        fn read_word(&mut self, address: u8, register: u8) -> Result<u16> {
            self.select(address)?;
            self.i2c
                .smbus_read_word(register)
                .map_err(|e| classify(&format!("i2c-{} read 0x{register:02X}", self.bus), e))
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux_impl::LinuxBus;

// ── Platform provider ──

/// Opens real bus handles on Linux; always fails with `Unsupported` elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformBusProvider;

impl BusProvider for PlatformBusProvider {
    #[cfg(target_os = "linux")]
    fn open(&self, bus: u8) -> Result<Box<dyn I2cBus>> {
        Ok(Box::new(LinuxBus::open(bus)?))
    }

    #[cfg(not(target_os = "linux"))]
    fn open(&self, _bus: u8) -> Result<Box<dyn I2cBus>> {
        Err(DeviceError::Unsupported)
    }
}

// ── Mock bus for testing ──

/// In-memory bus for unit and integration tests.
///
/// Always compiled (zero runtime cost), hidden from public docs.
#[doc(hidden)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    /// One recorded bus write.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BusWrite {
        pub address: u8,
        pub register: u8,
        pub value: u16,
    }

    #[derive(Debug, Default)]
    pub struct MockState {
        /// Byte-addressed register file: (slave address, register) → value.
        pub registers: HashMap<(u8, u8), u8>,
        /// Every write in order (bytes and words alike).
        pub writes: Vec<BusWrite>,
        /// If true, every write fails with `TransferFailed`.
        pub fail_writes: bool,
        /// If set, only writes to this register fail.
        pub fail_register: Option<u8>,
        /// If true, every read fails with `Busy`.
        pub busy_reads: bool,
        /// If true, every read fails with `TransferFailed`.
        pub fail_reads: bool,
    }

    /// Register-file bus. Clones share state so tests can keep a handle
    /// after passing one to a controller.
    #[derive(Debug, Clone, Default)]
    pub struct MockBus {
        state: Arc<Mutex<MockState>>,
    }

    impl MockBus {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn state(&self) -> MutexGuard<'_, MockState> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Current little-endian word at `register`.
        pub fn word(&self, address: u8, register: u8) -> u16 {
            let st = self.state();
            let lo = st.registers.get(&(address, register)).copied().unwrap_or(0);
            let hi = st
                .registers
                .get(&(address, register.wrapping_add(1)))
                .copied()
                .unwrap_or(0);
            u16::from_le_bytes([lo, hi])
        }

        pub fn byte(&self, address: u8, register: u8) -> u8 {
            self.state()
                .registers
                .get(&(address, register))
                .copied()
                .unwrap_or(0)
        }

        /// Preload a word without recording a write.
        pub fn preset_word(&self, address: u8, register: u8, value: u16) {
            let [lo, hi] = value.to_le_bytes();
            let mut st = self.state();
            st.registers.insert((address, register), lo);
            st.registers.insert((address, register.wrapping_add(1)), hi);
        }

        pub fn write_count(&self) -> usize {
            self.state().writes.len()
        }

        pub fn writes(&self) -> Vec<BusWrite> {
            self.state().writes.clone()
        }

        fn check_write(st: &MockState, register: u8) -> Result<()> {
            if st.fail_writes || st.fail_register == Some(register) {
                return Err(DeviceError::TransferFailed(format!(
                    "mock: write 0x{register:02X} failure injected"
                )));
            }
            Ok(())
        }

        fn check_read(st: &MockState, register: u8) -> Result<()> {
            if st.busy_reads {
                return Err(DeviceError::Busy(format!("mock: read 0x{register:02X}")));
            }
            if st.fail_reads {
                return Err(DeviceError::TransferFailed(format!(
                    "mock: read 0x{register:02X} failure injected"
                )));
            }
            Ok(())
        }
    }

    impl I2cBus for MockBus {
        fn write_byte(&mut self, address: u8, register: u8, value: u8) -> Result<()> {
            let mut st = self.state();
            Self::check_write(&st, register)?;
            st.registers.insert((address, register), value);
            st.writes.push(BusWrite {
                address,
                register,
                value: u16::from(value),
            });
            Ok(())
        }

        fn read_byte(&mut self, address: u8, register: u8) -> Result<u8> {
            let st = self.state();
            Self::check_read(&st, register)?;
            Ok(st.registers.get(&(address, register)).copied().unwrap_or(0))
        }

        fn write_word(&mut self, address: u8, register: u8, value: u16) -> Result<()> {
            let mut st = self.state();
            Self::check_write(&st, register)?;
            let [lo, hi] = value.to_le_bytes();
            st.registers.insert((address, register), lo);
            st.registers.insert((address, register.wrapping_add(1)), hi);
            st.writes.push(BusWrite {
                address,
                register,
                value,
            });
            Ok(())
        }

        fn read_word(&mut self, address: u8, register: u8) -> Result<u16> {
            let st = self.state();
            Self::check_read(&st, register)?;
            let lo = st.registers.get(&(address, register)).copied().unwrap_or(0);
            let hi = st
                .registers
                .get(&(address, register.wrapping_add(1)))
                .copied()
                .unwrap_or(0);
            Ok(u16::from_le_bytes([lo, hi]))
        }
    }

    /// Hands out [`MockBus`] handles, one shared bus per index.
    #[derive(Debug, Clone, Default)]
    pub struct MockBusProvider {
        buses: Arc<Mutex<HashMap<u8, MockBus>>>,
        fail_open: Arc<Mutex<bool>>,
    }

    impl MockBusProvider {
        pub fn new() -> Self {
            Self::default()
        }

        /// The shared bus for `index`, created on first use.
        pub fn bus(&self, index: u8) -> MockBus {
            self.buses
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(index)
                .or_default()
                .clone()
        }

        pub fn set_fail_open(&self, fail: bool) {
            *self.fail_open.lock().unwrap_or_else(PoisonError::into_inner) = fail;
        }
    }

    impl BusProvider for MockBusProvider {
        fn open(&self, bus: u8) -> Result<Box<dyn I2cBus>> {
            if *self.fail_open.lock().unwrap_or_else(PoisonError::into_inner) {
                return Err(DeviceError::OpenFailed(format!(
                    "mock: /dev/i2c-{bus} failure injected"
                )));
            }
            Ok(Box::new(self.bus(bus)))
        }
    }
}

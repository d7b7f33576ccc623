//! The out-of-band wake line. It is held high for the duration of a
//! command so the peer knows a request is coming; it carries no data.

use std::fmt::Debug;

/// A binary output line toggled around each command.
pub trait WakeSignal {
    type Error: Debug;

    fn assert_wake(&mut self) -> Result<(), Self::Error>;

    fn release_wake(&mut self) -> Result<(), Self::Error>;
}

impl<W: WakeSignal + ?Sized> WakeSignal for &mut W {
    type Error = W::Error;

    fn assert_wake(&mut self) -> Result<(), Self::Error> {
        (**self).assert_wake()
    }

    fn release_wake(&mut self) -> Result<(), Self::Error> {
        (**self).release_wake()
    }
}

/// For peers that are always awake.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWake;

impl WakeSignal for NoWake {
    type Error = core::convert::Infallible;

    fn assert_wake(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn release_wake(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Any `embedded-hal` output pin, active high.
#[derive(Debug)]
pub struct WakePin<P>(pub P);

impl<P: embedded_hal::digital::OutputPin> WakeSignal for WakePin<P>
where
    P::Error: Debug,
{
    type Error = P::Error;

    fn assert_wake(&mut self) -> Result<(), Self::Error> {
        self.0.set_high()
    }

    fn release_wake(&mut self) -> Result<(), Self::Error> {
        self.0.set_low()
    }
}

/// The DTR modem line of a serial port, for adapters that wire it to the
/// peer's wake input.
#[cfg(feature = "serial")]
pub struct DtrWake(pub Box<dyn serialport::SerialPort>);

#[cfg(feature = "serial")]
impl Debug for DtrWake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DtrWake").field(&self.0.name()).finish()
    }
}

#[cfg(feature = "serial")]
impl WakeSignal for DtrWake {
    type Error = serialport::Error;

    fn assert_wake(&mut self) -> Result<(), Self::Error> {
        self.0.write_data_terminal_ready(true)
    }

    fn release_wake(&mut self) -> Result<(), Self::Error> {
        self.0.write_data_terminal_ready(false)
    }
}

/// Holds the wake line high while alive, and releases it on drop, whichever
/// way the command ends.
#[derive(Debug)]
pub struct WakeGuard<'a, W: WakeSignal> {
    signal: &'a mut W,
}

impl<'a, W: WakeSignal> WakeGuard<'a, W> {
    pub fn new(signal: &'a mut W) -> Self {
        if let Err(e) = signal.assert_wake() {
            log::warn!("Failed to assert the wake line: {:?}", e);
        }
        Self { signal }
    }
}

impl<W: WakeSignal> Drop for WakeGuard<'_, W> {
    fn drop(&mut self) {
        if let Err(e) = self.signal.release_wake() {
            log::warn!("Failed to release the wake line: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_hal::digital::{ErrorType, OutputPin};

    #[derive(Default)]
    struct Pin {
        high: bool,
        edges: usize,
    }

    impl ErrorType for Pin {
        type Error = Infallible;
    }

    impl OutputPin for Pin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.high = false;
            self.edges += 1;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.high = true;
            self.edges += 1;
            Ok(())
        }
    }

    #[test]
    fn test_guard_releases() {
        let mut pin = WakePin(Pin::default());
        {
            let _guard = WakeGuard::new(&mut pin);
        }
        assert!(!pin.0.high);
        assert_eq!(pin.0.edges, 2);
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let mut pin = WakePin(Pin::default());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = WakeGuard::new(&mut pin);
            panic!("command failed");
        }));
        assert!(result.is_err());
        assert!(!pin.0.high);
    }
}

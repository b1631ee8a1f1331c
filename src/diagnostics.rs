//! Hooks for observing raw bus traffic without coupling the driver to an output device.

use crate::{descriptors::PageData, ll::Page, Accumulators};

/// Receives raw page dumps and accumulator values as the driver produces them.
///
/// All methods default to doing nothing; `()` is the no-op sink.
pub trait Diagnostics {
    /// A page was clocked out of the scratchpad. `valid` is false when its CRC did not match.
    fn page_read(&mut self, _page: Page, _raw: &[u8; 9], _valid: bool) {}

    /// A page was committed to memory.
    fn page_written(&mut self, _page: Page, _data: &PageData) {}

    /// The accumulator pages were read successfully.
    fn accumulators(&mut self, _accumulators: &Accumulators) {}
}

impl Diagnostics for () {}

impl<T: Diagnostics + ?Sized> Diagnostics for &mut T {
    fn page_read(&mut self, page: Page, raw: &[u8; 9], valid: bool) {
        (**self).page_read(page, raw, valid)
    }

    fn page_written(&mut self, page: Page, data: &PageData) {
        (**self).page_written(page, data)
    }

    fn accumulators(&mut self, accumulators: &Accumulators) {
        (**self).accumulators(accumulators)
    }
}

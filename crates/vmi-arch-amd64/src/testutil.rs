//! A minimal in-memory [`Driver`] used by the walker unit tests in this
//! crate; not part of the public API.

#![cfg(test)]

use std::{cell::RefCell, collections::HashMap};

use vmi_core::{Driver, Pa, ReadOutcome, VcpuRegister, VmiError};

pub struct FakeDriver {
    pages: RefCell<HashMap<u64, [u8; 4096]>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            pages: RefCell::new(HashMap::new()),
        }
    }

    pub fn write_u32(&self, pa: u64, value: u32) {
        self.write(pa, &value.to_le_bytes());
    }

    pub fn write_u64(&self, pa: u64, value: u64) {
        self.write(pa, &value.to_le_bytes());
    }

    fn write(&self, pa: u64, bytes: &[u8]) {
        let page_pa = pa & !0xFFF;
        let offset = (pa & 0xFFF) as usize;
        let mut pages = self.pages.borrow_mut();
        let page = pages.entry(page_pa).or_insert([0u8; 4096]);
        page[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

impl Driver for FakeDriver {
    fn read_pa(&self, pa: Pa, len: usize) -> Result<ReadOutcome, VmiError> {
        let page_pa = pa.value() & !0xFFF;
        let pages = self.pages.borrow();
        let page = pages.get(&page_pa).copied().unwrap_or([0u8; 4096]);
        Ok(ReadOutcome {
            data: page[..len].to_vec(),
            short: false,
        })
    }

    fn memsize(&self) -> Result<u64, VmiError> {
        Ok(1 << 48)
    }

    fn vcpu_register(&self, _reg: VcpuRegister, _vcpu: u32) -> Result<u64, VmiError> {
        Err(VmiError::NotSupported("fake driver"))
    }

    fn pause(&self) -> Result<(), VmiError> {
        Ok(())
    }

    fn resume(&self) -> Result<(), VmiError> {
        Ok(())
    }

    fn id_from_name(&self, _name: &str) -> Result<u64, VmiError> {
        Err(VmiError::NotSupported("fake driver"))
    }

    fn name_from_id(&self, _id: u64) -> Result<String, VmiError> {
        Err(VmiError::NotSupported("fake driver"))
    }

    fn check_id(&self, _id: u64) -> Result<bool, VmiError> {
        Ok(true)
    }
}

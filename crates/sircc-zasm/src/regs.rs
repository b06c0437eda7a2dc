//! The two-register value cache (`HL`, `DE`) used during value lowering.
//!
//! At most one binding per register is tracked at a time. Loading a slot
//! that is already cached in the right register is a no-op; any store that
//! could alias memory invalidates both bindings, since the cache has no
//! alias analysis to prove otherwise.

#[derive(Debug, Clone, PartialEq)]
pub struct CachedBinding {
    pub slot: String,
    pub width: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RegisterCache {
    hl: Option<CachedBinding>,
    de: Option<CachedBinding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Hl,
    De,
}

impl Register {
    pub fn name(self) -> &'static str {
        match self {
            Register::Hl => "HL",
            Register::De => "DE",
        }
    }
}

impl RegisterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `slot` is already resident in `reg` at `width`.
    pub fn hits(&self, reg: Register, slot: &str, width: u32) -> bool {
        let binding = match reg {
            Register::Hl => &self.hl,
            Register::De => &self.de,
        };
        matches!(binding, Some(b) if b.slot == slot && b.width == width)
    }

    pub fn bind(&mut self, reg: Register, slot: String, width: u32) {
        let binding = CachedBinding { slot, width };
        match reg {
            Register::Hl => self.hl = Some(binding),
            Register::De => self.de = Some(binding),
        }
    }

    /// Any store that might alias memory drops both cached bindings, since
    /// neither is provably unaffected.
    pub fn invalidate_on_store(&mut self) {
        self.hl = None;
        self.de = None;
    }

    /// A call clobbers both registers under this calling convention.
    pub fn invalidate_on_call(&mut self) {
        self.hl = None;
        self.de = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reloading_same_slot_and_width_hits() {
        let mut cache = RegisterCache::new();
        cache.bind(Register::Hl, "tmp_1".to_string(), 4);
        assert!(cache.hits(Register::Hl, "tmp_1", 4));
        assert!(!cache.hits(Register::Hl, "tmp_1", 8));
        assert!(!cache.hits(Register::Hl, "tmp_2", 4));
    }

    #[test]
    fn store_invalidates_both_registers() {
        let mut cache = RegisterCache::new();
        cache.bind(Register::Hl, "tmp_1".to_string(), 4);
        cache.bind(Register::De, "tmp_2".to_string(), 4);
        cache.invalidate_on_store();
        assert!(!cache.hits(Register::Hl, "tmp_1", 4));
        assert!(!cache.hits(Register::De, "tmp_2", 4));
    }
}

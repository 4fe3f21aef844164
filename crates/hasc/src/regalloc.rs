//! Local register allocation with automatic spilling.
//!
//! Allocation strategy on the 68000:
//!
//! - d0 holds the primary expression result and the return value, d1 the
//!   right-hand operand, d2 nested temporaries; d3-d6 are free for longer
//!   lived values; d7 stays reserved for `dbra` loop counters.
//! - a0-a2 serve as scratch address registers; a6 belongs to `link`/`unlk`
//!   and a7 is the stack pointer, so neither is in the pool.
//!
//! The code generator keeps its fixed-register conventions; this allocator
//! is the affordance for hand-driven sequences that need extra registers
//! without clobbering `#pragma lockreg` reservations. On exhaustion it
//! spills through the stack and remembers the order so restores pop in
//! reverse.

use ahash::AHashSet;

const DATA_POOL: [&str; 7] = ["d0", "d1", "d2", "d3", "d4", "d5", "d6"];
const ADDR_POOL: [&str; 3] = ["a0", "a1", "a2"];

/// A saved allocation state, restored around call sites.
pub type Context = (AHashSet<String>, AHashSet<String>, Vec<String>);

#[derive(Debug, Default)]
pub struct RegisterAllocator {
    data_regs: Vec<&'static str>,
    addr_regs: Vec<&'static str>,
    data_in_use: AHashSet<String>,
    addr_in_use: AHashSet<String>,
    spilled: Vec<String>,
}

impl RegisterAllocator {
    /// Builds the pools, excluding registers locked by pragma.
    #[must_use]
    pub fn new(locked: &AHashSet<String>) -> Self {
        Self {
            data_regs: DATA_POOL.iter().copied().filter(|r| !locked.contains(*r)).collect(),
            addr_regs: ADDR_POOL.iter().copied().filter(|r| !locked.contains(*r)).collect(),
            data_in_use: AHashSet::new(),
            addr_in_use: AHashSet::new(),
            spilled: Vec::new(),
        }
    }

    /// Allocates a data register, honoring `preferred` when free.
    ///
    /// Returns the register and any spill code that had to be emitted to
    /// free it.
    pub fn allocate_data(&mut self, preferred: Option<&str>) -> (String, Vec<String>) {
        if let Some(reg) = preferred {
            if !self.data_in_use.contains(reg) {
                self.data_in_use.insert(reg.to_owned());
                return (reg.to_owned(), Vec::new());
            }
        }
        for reg in &self.data_regs {
            if !self.data_in_use.contains(*reg) {
                self.data_in_use.insert((*reg).to_owned());
                return ((*reg).to_owned(), Vec::new());
            }
        }
        // everything is live; spill the first non-d0 register to keep the
        // current result intact
        let victim = self
            .data_regs
            .iter()
            .skip(1)
            .find(|r| self.data_in_use.contains(**r))
            .copied()
            .unwrap_or(self.data_regs[0]);
        let code = vec![format!("    move.l {victim},-(a7)  ; spill {victim}")];
        self.spilled.push(victim.to_owned());
        self.data_in_use.remove(victim);
        self.data_in_use.insert(victim.to_owned());
        (victim.to_owned(), code)
    }

    /// Allocates an address register, honoring `preferred` when free.
    pub fn allocate_addr(&mut self, preferred: Option<&str>) -> (String, Vec<String>) {
        if let Some(reg) = preferred {
            if !self.addr_in_use.contains(reg) {
                self.addr_in_use.insert(reg.to_owned());
                return (reg.to_owned(), Vec::new());
            }
        }
        for reg in &self.addr_regs {
            if !self.addr_in_use.contains(*reg) {
                self.addr_in_use.insert((*reg).to_owned());
                return ((*reg).to_owned(), Vec::new());
            }
        }
        let victim = self.addr_regs[0];
        let code = vec![format!("    move.l {victim},-(a7)  ; spill {victim}")];
        self.spilled.push(victim.to_owned());
        self.addr_in_use.insert(victim.to_owned());
        (victim.to_owned(), code)
    }

    /// Returns a register to its pool.
    pub fn free(&mut self, register: &str) {
        if !self.data_in_use.remove(register) {
            self.addr_in_use.remove(register);
        }
    }

    /// Pops the most recently spilled register, returning the restore code.
    pub fn restore_spilled(&mut self) -> Option<(String, Vec<String>)> {
        let reg = self.spilled.pop()?;
        let code = vec![format!("    move.l (a7)+,{reg}  ; restore {reg}")];
        Some((reg, code))
    }

    /// Snapshots the allocation state before a nested context (a call
    /// site); pair with [`Self::restore_context`].
    #[must_use]
    pub fn save_context(&self) -> Context {
        (self.data_in_use.clone(), self.addr_in_use.clone(), self.spilled.clone())
    }

    pub fn restore_context(&mut self, context: Context) {
        (self.data_in_use, self.addr_in_use, self.spilled) = context;
    }

    /// Clears all allocations at the start of a new procedure.
    pub fn reset(&mut self) {
        self.data_in_use.clear();
        self.addr_in_use.clear();
        self.spilled.clear();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn allocator() -> RegisterAllocator {
        RegisterAllocator::new(&AHashSet::new())
    }

    #[test]
    fn preferred_register_wins_when_free() {
        let mut alloc = allocator();
        let (reg, spill) = alloc.allocate_data(Some("d3"));
        assert_eq!(reg, "d3");
        assert!(spill.is_empty());
    }

    #[test]
    fn allocation_walks_the_pool_in_order() {
        let mut alloc = allocator();
        assert_eq!(alloc.allocate_data(None).0, "d0");
        assert_eq!(alloc.allocate_data(None).0, "d1");
        assert_eq!(alloc.allocate_data(None).0, "d2");
    }

    #[test]
    fn exhaustion_spills_a_non_result_register() {
        let mut alloc = allocator();
        for _ in 0..7 {
            alloc.allocate_data(None);
        }
        let (reg, spill) = alloc.allocate_data(None);
        assert_eq!(reg, "d1", "spill avoids d0, which holds the current result");
        assert_eq!(spill, vec!["    move.l d1,-(a7)  ; spill d1".to_owned()]);
        let (restored, code) = alloc.restore_spilled().expect("one spill outstanding");
        assert_eq!(restored, "d1");
        assert_eq!(code, vec!["    move.l (a7)+,d1  ; restore d1".to_owned()]);
    }

    #[test]
    fn locked_registers_never_appear() {
        let mut locked = AHashSet::new();
        locked.insert("d0".to_owned());
        locked.insert("a0".to_owned());
        let mut alloc = RegisterAllocator::new(&locked);
        assert_eq!(alloc.allocate_data(None).0, "d1");
        assert_eq!(alloc.allocate_addr(None).0, "a1");
    }

    #[test]
    fn freeing_makes_a_register_available_again() {
        let mut alloc = allocator();
        let (reg, _) = alloc.allocate_data(None);
        alloc.free(&reg);
        assert_eq!(alloc.allocate_data(None).0, "d0");
    }

    #[test]
    fn context_round_trip_restores_allocations() {
        let mut alloc = allocator();
        alloc.allocate_data(None);
        let saved = alloc.save_context();
        alloc.allocate_data(None);
        alloc.restore_context(saved);
        assert_eq!(alloc.allocate_data(None).0, "d1", "d1 was free again after restore");
    }
}

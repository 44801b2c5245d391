//! The fixed-capacity name table.
//!
//! Every lookup the resolver has been asked to perform occupies one slot of a
//! fixed-size array. When the table is full, the least recently stamped slot
//! is evicted; its query silently disappears and the original asker times
//! out. Slot ages are tracked with a wrapping `u8` sequence number, compared
//! by modular subtraction.

use std::net::IpAddr;

use crate::{MAX_HOSTNAME_LEN, NAME_TABLE_SIZE};

/// Resolution state of a [`Slot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum SlotState {
    /// Free for reuse.
    #[default]
    Unused,
    /// Queued by `query`, no packet sent yet.
    New,
    /// At least one query packet is in flight.
    Asking,
    /// Resolved; `addr` is valid.
    Done,
    /// Finished without a usable answer.
    Error,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Slot {
    pub(crate) state: SlotState,
    /// Canonical name: no trailing dots, at most [`MAX_HOSTNAME_LEN`] bytes.
    pub(crate) name: String,
    /// Only meaningful in [`SlotState::Done`].
    pub(crate) addr: Option<IpAddr>,
    /// Ticks until the next retransmit.
    pub(crate) tmr: u8,
    /// Retransmissions issued so far.
    pub(crate) retries: u8,
    /// Age stamp for LRU eviction.
    pub(crate) seqno: u8,
    /// Low nibble of the response code that finished this slot.
    pub(crate) err: u8,
    /// Query goes to the mDNS group instead of the configured server.
    pub(crate) is_mdns: bool,
}

pub(crate) struct NameTable {
    slots: [Slot; NAME_TABLE_SIZE],
    seqno: u8,
}

impl NameTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: Default::default(),
            seqno: 0,
        }
    }

    /// Brings a host name into canonical slot form: trailing dots stripped,
    /// truncated to [`MAX_HOSTNAME_LEN`] bytes on a char boundary.
    pub(crate) fn canonicalize(name: &str) -> String {
        let mut name = name.trim_end_matches('.');
        if name.len() > MAX_HOSTNAME_LEN {
            let mut end = MAX_HOSTNAME_LEN;
            while !name.is_char_boundary(end) {
                end -= 1;
            }
            name = &name[..end];
        }
        name.to_owned()
    }

    /// Finds the slot to use for a query of `name` (already canonical):
    /// the slot already holding `name`, the first unused slot, or the least
    /// recently stamped slot as the eviction victim.
    ///
    /// The returned slot is reset to [`SlotState::New`] with a fresh age
    /// stamp; the caller fills in `is_mdns`.
    pub(crate) fn acquire(&mut self, name: &str) -> usize {
        let mut victim = 0;
        let mut victim_age = 0;
        let mut index = None;
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.state == SlotState::Unused || slot.name == name {
                index = Some(i);
                break;
            }
            let age = self.seqno.wrapping_sub(slot.seqno);
            if age > victim_age {
                victim_age = age;
                victim = i;
            }
        }
        let index = index.unwrap_or(victim);

        let slot = &mut self.slots[index];
        *slot = Slot {
            state: SlotState::New,
            name: name.to_owned(),
            seqno: self.seqno,
            ..Slot::default()
        };
        self.seqno = self.seqno.wrapping_add(1);
        index
    }

    pub(crate) fn get(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Slot> {
        self.slots.get_mut(index)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut Slot)> {
        self.slots.iter_mut().enumerate()
    }

    /// Looks up the resolved address of `name` (already canonical).
    /// Name comparison is case-sensitive, exactly as the names were stored.
    pub(crate) fn lookup_done(&self, name: &str) -> Option<IpAddr> {
        self.slots
            .iter()
            .find(|slot| slot.state == SlotState::Done && slot.name == name)
            .and_then(|slot| slot.addr)
    }

    /// Returns whether any slot still needs the retry timer to run.
    pub(crate) fn has_pending(&self) -> bool {
        self.slots
            .iter()
            .any(|slot| matches!(slot.state, SlotState::New | SlotState::Asking))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_strips_trailing_dots() {
        assert_eq!(NameTable::canonicalize("example.com."), "example.com");
        assert_eq!(NameTable::canonicalize("example.com..."), "example.com");
        assert_eq!(NameTable::canonicalize("example.com"), "example.com");
    }

    #[test]
    fn stores_names_bounded() {
        // Exactly MAX_HOSTNAME_LEN bytes survive intact.
        let exact = "a".repeat(MAX_HOSTNAME_LEN);
        assert_eq!(NameTable::canonicalize(&exact), exact);

        // One byte longer is truncated at store time.
        let long = "a".repeat(MAX_HOSTNAME_LEN + 1);
        assert_eq!(NameTable::canonicalize(&long), exact);
    }

    #[test]
    fn reuses_slot_for_same_name() {
        let mut table = NameTable::new();
        let a = table.acquire("example.com");
        let b = table.acquire("example.com");
        assert_eq!(a, b);

        let mut in_use = 0;
        for i in 0..NAME_TABLE_SIZE {
            if table.get(i).unwrap().state != SlotState::Unused {
                in_use += 1;
            }
        }
        assert_eq!(in_use, 1);
    }

    #[test]
    fn evicts_least_recently_stamped() {
        let mut table = NameTable::new();
        for i in 0..NAME_TABLE_SIZE {
            table.acquire(&format!("host{}.example", i));
        }
        // Table is full; the next acquire displaces the oldest entry.
        let index = table.acquire("latecomer.example");
        assert_eq!(index, 0);
        assert_eq!(table.get(0).unwrap().name, "latecomer.example");
        assert!(table.lookup_done("host0.example").is_none());
    }

    #[test]
    fn eviction_survives_seqno_wraparound() {
        let mut table = NameTable::new();
        // Age the counter right up to the wrap point.
        for _ in 0..253 {
            table.acquire("churn.example");
        }
        for i in 0..NAME_TABLE_SIZE {
            table.acquire(&format!("host{}.example", i));
        }
        // host0 was stamped before the u8 wrapped; it must still be the victim.
        let index = table.acquire("latecomer.example");
        assert_eq!(table.get(index).unwrap().name, "latecomer.example");
        assert_eq!(index, 1);
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let mut table = NameTable::new();
        let i = table.acquire("example.com");
        let slot = table.get_mut(i).unwrap();
        slot.state = SlotState::Done;
        slot.addr = Some("93.184.216.34".parse().unwrap());

        assert!(table.lookup_done("example.com").is_some());
        assert!(table.lookup_done("EXAMPLE.com").is_none());
    }
}

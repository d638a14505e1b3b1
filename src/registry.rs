//! Process-local segment bookkeeping
//!
//! Two partitions: `local` segments were created by this process, which
//! therefore owes them both a close and an unlink; `foreign` segments were
//! merely attached, and this process owes them nothing beyond releasing
//! its own mapping. A name lives in at most one partition. Cross-process
//! name uniqueness comes from the OS, not from here, and no locking is
//! needed: all registry mutation happens on the thread issuing the
//! lifecycle call.

use crate::error::{Result, ShmError};
use crate::segment::Segment;
use std::collections::HashMap;

/// State of a segment this process created
pub enum LocalEntry {
    /// Mapping live; close still owed before unlink is legal
    Mapped(Segment),
    /// Mapping released; unlink still owed
    Closed,
}

/// The per-process `name -> segment` table, split by ownership
#[derive(Default)]
pub struct SegmentRegistry {
    local: HashMap<String, LocalEntry>,
    foreign: HashMap<String, Segment>,
}

impl SegmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the name is present in either partition
    pub fn contains(&self, name: &str) -> bool {
        self.local.contains_key(name) || self.foreign.contains_key(name)
    }

    /// True if this process created the named segment
    pub fn is_local(&self, name: &str) -> bool {
        self.local.contains_key(name)
    }

    /// Record a segment created by this process.
    pub fn register_local(&mut self, segment: Segment) -> Result<()> {
        let name = segment.name().to_string();
        if self.contains(&name) {
            return Err(ShmError::DuplicateName { name });
        }
        self.local.insert(name, LocalEntry::Mapped(segment));
        Ok(())
    }

    /// Record a segment attached from another process.
    pub fn register_foreign(&mut self, segment: Segment) -> Result<()> {
        let name = segment.name().to_string();
        if self.contains(&name) {
            return Err(ShmError::DuplicateName { name });
        }
        self.foreign.insert(name, segment);
        Ok(())
    }

    /// Resolve a name to its mapped segment: local first, then foreign,
    /// then a fresh OS attach registered as foreign.
    pub fn lookup(&mut self, name: &str) -> Result<&Segment> {
        // Split borrows keep this awkward; membership tests first.
        if self.local.contains_key(name) {
            return match self.local.get(name) {
                Some(LocalEntry::Mapped(seg)) => Ok(seg),
                _ => Err(ShmError::NotFound {
                    name: name.to_string(),
                }),
            };
        }
        if !self.foreign.contains_key(name) {
            let segment = Segment::open(name)?;
            self.foreign.insert(name.to_string(), segment);
        }
        Ok(self.foreign.get(name).expect("just inserted"))
    }

    /// Peek at a mapped segment without attaching on miss.
    pub fn get(&self, name: &str) -> Option<&Segment> {
        match self.local.get(name) {
            Some(LocalEntry::Mapped(seg)) => Some(seg),
            Some(LocalEntry::Closed) => None,
            None => self.foreign.get(name),
        }
    }

    /// Drop a local entry. Bookkeeping only, no OS effect.
    pub fn remove_local(&mut self, name: &str) -> Option<LocalEntry> {
        self.local.remove(name)
    }

    /// Drop a foreign entry. Bookkeeping only, no OS effect.
    pub fn remove_foreign(&mut self, name: &str) -> Option<Segment> {
        self.foreign.remove(name)
    }

    /// Transition a local entry to `Closed`, handing the mapping back to
    /// the caller to release.
    pub fn take_local_mapping(&mut self, name: &str) -> Option<Segment> {
        match self.local.get_mut(name) {
            Some(entry @ LocalEntry::Mapped(_)) => {
                match std::mem::replace(entry, LocalEntry::Closed) {
                    LocalEntry::Mapped(seg) => Some(seg),
                    LocalEntry::Closed => unreachable!(),
                }
            }
            _ => None,
        }
    }

    pub fn local_state(&self, name: &str) -> Option<&LocalEntry> {
        self.local.get(name)
    }

    /// Empty the foreign partition for a cleanup sweep.
    pub fn drain_foreign(&mut self) -> Vec<(String, Segment)> {
        self.foreign.drain().collect()
    }

    /// Empty the local partition for a cleanup sweep.
    pub fn drain_local(&mut self) -> Vec<(String, LocalEntry)> {
        self.local.drain().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.foreign.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::generate_name;
    use crate::segment;

    #[test]
    fn test_duplicate_name_rejected_across_partitions() {
        let name = generate_name();
        let seg = Segment::create(&name, 16).unwrap();
        let dup = Segment::open(&name).unwrap();

        let mut registry = SegmentRegistry::new();
        registry.register_local(seg).unwrap();
        assert!(matches!(
            registry.register_foreign(dup),
            Err(ShmError::DuplicateName { .. })
        ));

        if let Some(LocalEntry::Mapped(seg)) = registry.remove_local(&name) {
            seg.close().unwrap();
        }
        segment::unlink(&name).unwrap();
    }

    #[test]
    fn test_lookup_attaches_on_miss() {
        let name = generate_name();
        let owner = Segment::create(&name, 32).unwrap();

        // A second registry standing in for a second process
        let mut other = SegmentRegistry::new();
        assert!(!other.contains(&name));
        let attached = other.lookup(&name).unwrap();
        assert_eq!(attached.size(), 32);
        assert!(other.contains(&name));
        assert!(!other.is_local(&name));

        // Repeated lookup reuses the entry rather than re-attaching
        other.lookup(&name).unwrap();

        other.remove_foreign(&name).unwrap().close().unwrap();
        owner.close().unwrap();
        segment::unlink(&name).unwrap();
    }

    #[test]
    fn test_lookup_missing_is_not_found() {
        let mut registry = SegmentRegistry::new();
        assert!(matches!(
            registry.lookup(&generate_name()),
            Err(ShmError::NotFound { .. })
        ));
    }
}

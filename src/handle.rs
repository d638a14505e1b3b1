//! Serializable segment identity
//!
//! A handle is the only part of a typed view that crosses process
//! boundaries: name, element count, element layout. The payload bytes
//! never travel with it; the receiving process reattaches to the same
//! OS segment by name and binds an equivalent view over the same memory.

use crate::error::Result;
use crate::layout::ElementLayout;
use serde::{Deserialize, Serialize};

/// Identity and layout of a shared array, safe to send anywhere
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayHandle {
    pub name: String,
    pub element_count: usize,
    pub element_layout: ElementLayout,
}

impl ArrayHandle {
    pub fn new(name: String, element_count: usize, element_layout: ElementLayout) -> Self {
        Self {
            name,
            element_count,
            element_layout,
        }
    }

    /// Bytes per element
    pub fn stride(&self) -> usize {
        self.element_layout.stride()
    }

    /// Total bytes the view spans. Saturates rather than wrapping, so an
    /// implausible transported handle fails the geometry check instead of
    /// sneaking past it.
    pub fn byte_len(&self) -> usize {
        self.element_count.saturating_mul(self.stride())
    }

    /// Encode for transport, e.g. as a spawn argument.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a transported handle. Binding it to memory is a separate
    /// attach step, which fails with `NotFound` if the segment was
    /// unlinked in the meantime.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip() {
        let handle = ArrayHandle::new(
            "p1234_abc".to_string(),
            9,
            ElementLayout::record("ddd").unwrap(),
        );
        let json = handle.to_json().unwrap();
        assert_eq!(ArrayHandle::from_json(&json).unwrap(), handle);

        let raw = ArrayHandle::new("p1234_xyz".to_string(), 16, ElementLayout::Raw);
        let json = raw.to_json().unwrap();
        assert!(json.contains("\"element_layout\":\"raw\""));
        assert_eq!(ArrayHandle::from_json(&json).unwrap(), raw);
    }

    #[test]
    fn test_wire_shape() {
        let handle = ArrayHandle::new(
            "seg".to_string(),
            3,
            ElementLayout::record("<3f").unwrap(),
        );
        let json = handle.to_json().unwrap();
        assert!(json.contains("\"name\":\"seg\""));
        assert!(json.contains("\"element_count\":3"));
        assert!(json.contains("\"element_layout\":\"<3f\""));
    }

    #[test]
    fn test_geometry() {
        let handle = ArrayHandle::new("seg".to_string(), 9, ElementLayout::record("ddd").unwrap());
        assert_eq!(handle.stride(), 24);
        assert_eq!(handle.byte_len(), 216);
    }
}

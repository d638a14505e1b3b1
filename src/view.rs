//! Typed views over segment bytes
//!
//! A view borrows its context for as long as it lives, so the context's
//! `close`/`unlink`/`cleanup_all` (which take `&mut self`) cannot run
//! while any view into the mapping exists: unmapping a segment under a
//! live view is a borrow error, not a runtime fault.

use crate::context::ShmContext;
use crate::error::{Result, ShmError};
use crate::handle::ArrayHandle;
use crate::layout::{Element, ElementLayout, Scalar};
use std::marker::PhantomData;
use std::ptr::NonNull;

/// A fixed-stride array bound to a mapped segment.
///
/// Indexed access is bounds-checked and supports negative indices counted
/// from the end. Writes land directly in the shared mapping and are
/// immediately visible to every process attached to the segment; there is
/// no buffering and no flush. No synchronization is provided either;
/// concurrent writers partition the index space between themselves.
pub struct ShmArray<'ctx> {
    handle: ArrayHandle,
    ptr: NonNull<u8>,
    _ctx: PhantomData<&'ctx ShmContext>,
}

impl<'ctx> ShmArray<'ctx> {
    pub(crate) fn bind(handle: ArrayHandle, ptr: NonNull<u8>) -> Self {
        Self {
            handle,
            ptr,
            _ctx: PhantomData,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.handle.element_count
    }

    pub fn is_empty(&self) -> bool {
        self.handle.element_count == 0
    }

    /// Segment name backing this view
    pub fn name(&self) -> &str {
        &self.handle.name
    }

    pub fn layout(&self) -> &ElementLayout {
        &self.handle.element_layout
    }

    /// Bytes per element
    pub fn stride(&self) -> usize {
        self.handle.stride()
    }

    /// Total bytes the view spans
    pub fn size_bytes(&self) -> usize {
        self.handle.byte_len()
    }

    /// Capture the identity triple for transport to another process.
    /// The payload bytes stay behind.
    pub fn to_handle(&self) -> ArrayHandle {
        self.handle.clone()
    }

    fn resolve(&self, index: isize) -> Result<usize> {
        let len = self.len();
        let resolved = if index < 0 {
            index + len as isize
        } else {
            index
        };
        if resolved < 0 || resolved as usize >= len {
            return Err(ShmError::IndexOutOfRange { index, len });
        }
        Ok(resolved as usize)
    }

    fn element_bytes(&self, index: usize) -> &[u8] {
        let stride = self.stride();
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().add(index * stride), stride) }
    }

    fn element_bytes_mut(&mut self, index: usize) -> &mut [u8] {
        let stride = self.stride();
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(index * stride), stride) }
    }

    /// Decode the element at `index`.
    pub fn get(&self, index: isize) -> Result<Element> {
        let index = self.resolve(index)?;
        Ok(self.decode(index))
    }

    fn decode(&self, index: usize) -> Element {
        match &self.handle.element_layout {
            ElementLayout::Raw => Element::Byte(self.element_bytes(index)[0]),
            ElementLayout::Record(rec) => Element::Record(rec.unpack(self.element_bytes(index))),
        }
    }

    /// Encode `value` into the element at `index`, in place.
    pub fn set(&mut self, index: isize, value: &Element) -> Result<()> {
        let index = self.resolve(index)?;
        match (&self.handle.element_layout, value) {
            (ElementLayout::Raw, Element::Byte(b)) => {
                let b = *b;
                self.element_bytes_mut(index)[0] = b;
                Ok(())
            }
            (ElementLayout::Record(rec), Element::Record(values)) => {
                let stride = rec.stride();
                let bytes = unsafe {
                    std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(index * stride), stride)
                };
                rec.pack(values, bytes)
            }
            (layout, value) => Err(ShmError::LayoutMismatch {
                expected: layout.mode_name(),
                got: match value {
                    Element::Byte(_) => "raw",
                    Element::Record(_) => "record",
                },
            }),
        }
    }

    /// Byte at `index`; raw mode only.
    pub fn get_byte(&self, index: isize) -> Result<u8> {
        match self.handle.element_layout {
            ElementLayout::Raw => {
                let index = self.resolve(index)?;
                Ok(self.element_bytes(index)[0])
            }
            _ => Err(ShmError::LayoutMismatch {
                expected: "raw",
                got: "record",
            }),
        }
    }

    /// Write a byte at `index`; raw mode only.
    pub fn set_byte(&mut self, index: isize, value: u8) -> Result<()> {
        match self.handle.element_layout {
            ElementLayout::Raw => {
                let index = self.resolve(index)?;
                self.element_bytes_mut(index)[0] = value;
                Ok(())
            }
            _ => Err(ShmError::LayoutMismatch {
                expected: "raw",
                got: "record",
            }),
        }
    }

    /// Decoded record at `index`; record mode only.
    pub fn get_record(&self, index: isize) -> Result<Vec<Scalar>> {
        match &self.handle.element_layout {
            ElementLayout::Record(rec) => {
                let index = self.resolve(index)?;
                Ok(rec.unpack(self.element_bytes(index)))
            }
            _ => Err(ShmError::LayoutMismatch {
                expected: "record",
                got: "raw",
            }),
        }
    }

    /// Encode a record at `index`; record mode only.
    pub fn set_record(&mut self, index: isize, values: &[Scalar]) -> Result<()> {
        match &self.handle.element_layout {
            ElementLayout::Record(rec) => {
                let index = self.resolve(index)?;
                let stride = rec.stride();
                let bytes = unsafe {
                    std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(index * stride), stride)
                };
                rec.pack(values, bytes)
            }
            _ => Err(ShmError::LayoutMismatch {
                expected: "record",
                got: "raw",
            }),
        }
    }

    /// Iterate decoded elements in index order.
    ///
    /// Each element is decoded independently; the iterator never hands out
    /// references into the mapping, and a fresh call restarts from zero.
    pub fn iter(&self) -> Elements<'_, 'ctx> {
        Elements {
            array: self,
            index: 0,
        }
    }

    /// The whole mapped region as bytes. Bulk escape hatch; bounds and
    /// layout are the caller's problem at this level.
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size_bytes()) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size_bytes()) }
    }
}

/// Iterator over decoded elements of a [`ShmArray`]
pub struct Elements<'a, 'ctx> {
    array: &'a ShmArray<'ctx>,
    index: usize,
}

impl Iterator for Elements<'_, '_> {
    type Item = Element;

    fn next(&mut self) -> Option<Element> {
        if self.index >= self.array.len() {
            return None;
        }
        let element = self.array.decode(self.index);
        self.index += 1;
        Some(element)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.array.len() - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Elements<'_, '_> {}

impl<'a, 'ctx> IntoIterator for &'a ShmArray<'ctx> {
    type Item = Element;
    type IntoIter = Elements<'a, 'ctx>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ShmContext;
    use crate::layout::ElementLayout;

    #[test]
    fn test_raw_end_to_end() {
        let producer = ShmContext::new();
        let mut array = producer.create_array(9, ElementLayout::Raw).unwrap();
        for i in 0..9 {
            array.set_byte(i as isize, i as u8).unwrap();
        }
        let handle = array.to_handle();
        drop(array);

        // A second context standing in for the receiving process
        let consumer = ShmContext::new();
        let attached = consumer.view(&handle).unwrap();
        let bytes: Vec<u8> = attached
            .iter()
            .map(|e| match e {
                Element::Byte(b) => b,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(bytes, vec![0, 1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_record_set_get() {
        let ctx = ShmContext::new();
        let mut array = ctx
            .create_array(9, ElementLayout::record("ddd").unwrap())
            .unwrap();
        array
            .set_record(0, &[1.0.into(), 2.0.into(), 3.0.into()])
            .unwrap();

        let expected = vec![Scalar::F64(1.0), Scalar::F64(2.0), Scalar::F64(3.0)];
        assert_eq!(array.get_record(0).unwrap(), expected);
        // Negative index counted from the end reaches the same element
        assert_eq!(array.get_record(-9).unwrap(), expected);
        assert_eq!(array.get(0).unwrap(), Element::Record(expected));
    }

    #[test]
    fn test_negative_indexing() {
        let ctx = ShmContext::new();
        let mut array = ctx.create_array(5, ElementLayout::Raw).unwrap();
        array.set_byte(4, 99).unwrap();
        assert_eq!(array.get_byte(-1).unwrap(), 99);
        assert_eq!(array.get_byte(-1).unwrap(), array.get_byte(4).unwrap());
    }

    #[test]
    fn test_out_of_range() {
        let ctx = ShmContext::new();
        let array = ctx.create_array(5, ElementLayout::Raw).unwrap();
        assert!(matches!(
            array.get(5),
            Err(ShmError::IndexOutOfRange { index: 5, len: 5 })
        ));
        assert!(matches!(
            array.get(-6),
            Err(ShmError::IndexOutOfRange { index: -6, len: 5 })
        ));
        let rec_ctx = ShmContext::new();
        let rec = rec_ctx
            .create_array(5, ElementLayout::record("d").unwrap())
            .unwrap();
        assert!(matches!(
            rec.get(17),
            Err(ShmError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_layout_mode_enforced() {
        let ctx = ShmContext::new();
        let mut raw = ctx.create_array(4, ElementLayout::Raw).unwrap();
        assert!(matches!(
            raw.get_record(0),
            Err(ShmError::LayoutMismatch { .. })
        ));
        assert!(matches!(
            raw.set(0, &Element::Record(vec![Scalar::Int(1)])),
            Err(ShmError::LayoutMismatch { .. })
        ));

        let mut rec = ctx
            .create_array(4, ElementLayout::record("h").unwrap())
            .unwrap();
        assert!(matches!(
            rec.set_byte(0, 1),
            Err(ShmError::LayoutMismatch { .. })
        ));
    }

    #[test]
    fn test_iteration_restartable() {
        let ctx = ShmContext::new();
        let mut array = ctx
            .create_array(3, ElementLayout::record("<h").unwrap())
            .unwrap();
        for i in 0..3 {
            array.set_record(i, &[Scalar::Int(i as i64 * 10)]).unwrap();
        }

        let first: Vec<Element> = array.iter().collect();
        let second: Vec<Element> = array.iter().collect();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        assert_eq!(
            first[2],
            Element::Record(vec![Scalar::Int(20)])
        );
    }

    #[test]
    fn test_writes_visible_through_other_mapping() {
        let writer_ctx = ShmContext::new();
        let mut writer = writer_ctx.create_array(4, ElementLayout::Raw).unwrap();
        let handle = writer.to_handle();

        let reader_ctx = ShmContext::new();
        let reader = reader_ctx.view(&handle).unwrap();

        writer.set_byte(2, 7).unwrap();
        // No flush step: the write is already there for the other mapping
        assert_eq!(reader.get_byte(2).unwrap(), 7);
    }
}

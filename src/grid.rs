//! Row-major 2D views
//!
//! The one extension the rendering workload needs from the core: a view
//! that knows its `width` and `height` and addresses elements row-major
//! (`index = y * width + x`). Everything else is the plain array contract.

use crate::context::ShmContext;
use crate::error::{Result, ShmError};
use crate::handle::ArrayHandle;
use crate::layout::{Element, ElementLayout};
use crate::view::{Elements, ShmArray};
use serde::{Deserialize, Serialize};

/// Identity of a grid: the array handle plus its dimensions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridHandle {
    #[serde(flatten)]
    pub array: ArrayHandle,
    pub width: usize,
    pub height: usize,
}

impl GridHandle {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A width × height view over a shared segment, row-major
pub struct ShmGrid<'ctx> {
    view: ShmArray<'ctx>,
    width: usize,
    height: usize,
}

impl<'ctx> ShmGrid<'ctx> {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Row-major element index of `(x, y)`
    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    pub fn get(&self, x: usize, y: usize) -> Result<Element> {
        self.check(x, y)?;
        self.view.get(self.index(x, y) as isize)
    }

    pub fn set(&mut self, x: usize, y: usize, value: &Element) -> Result<()> {
        self.check(x, y)?;
        let index = self.index(x, y) as isize;
        self.view.set(index, value)
    }

    fn check(&self, x: usize, y: usize) -> Result<()> {
        if x >= self.width || y >= self.height {
            return Err(ShmError::IndexOutOfRange {
                index: (y * self.width + x) as isize,
                len: self.view.len(),
            });
        }
        Ok(())
    }

    /// Iterate decoded elements row by row.
    pub fn iter(&self) -> Elements<'_, 'ctx> {
        self.view.iter()
    }

    /// The flat array underneath
    pub fn view(&self) -> &ShmArray<'ctx> {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut ShmArray<'ctx> {
        &mut self.view
    }

    pub fn to_handle(&self) -> GridHandle {
        GridHandle {
            array: self.view.to_handle(),
            width: self.width,
            height: self.height,
        }
    }
}

impl ShmContext {
    /// Create a `width × height` grid of `layout` elements.
    pub fn create_grid(
        &self,
        width: usize,
        height: usize,
        layout: ElementLayout,
    ) -> Result<ShmGrid<'_>> {
        let view = self.create_array(width.saturating_mul(height), layout)?;
        Ok(ShmGrid {
            view,
            width,
            height,
        })
    }

    /// Bind a grid over the segment a transported handle names.
    pub fn grid(&self, handle: &GridHandle) -> Result<ShmGrid<'_>> {
        if handle.width.checked_mul(handle.height) != Some(handle.array.element_count) {
            return Err(ShmError::ViewGeometry {
                name: handle.array.name.clone(),
                size: handle.array.byte_len(),
                needed: handle
                    .width
                    .saturating_mul(handle.height)
                    .saturating_mul(handle.array.stride()),
            });
        }
        let view = self.view(&handle.array)?;
        Ok(ShmGrid {
            view,
            width: handle.width,
            height: handle.height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Scalar;

    #[test]
    fn test_row_major_addressing() {
        let ctx = ShmContext::new();
        let mut grid = ctx.create_grid(4, 3, ElementLayout::Raw).unwrap();
        grid.set(1, 2, &Element::Byte(77)).unwrap();

        assert_eq!(grid.index(1, 2), 9);
        assert_eq!(grid.view().get_byte(9).unwrap(), 77);
        assert_eq!(grid.get(1, 2).unwrap(), Element::Byte(77));
    }

    #[test]
    fn test_bounds() {
        let ctx = ShmContext::new();
        let grid = ctx.create_grid(4, 3, ElementLayout::Raw).unwrap();
        assert!(matches!(
            grid.get(4, 0),
            Err(ShmError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            grid.get(0, 3),
            Err(ShmError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_handle_round_trip_across_contexts() {
        let producer = ShmContext::new();
        let mut grid = producer
            .create_grid(2, 2, ElementLayout::record("<2h").unwrap())
            .unwrap();
        grid.set(1, 1, &Element::Record(vec![Scalar::Int(3), Scalar::Int(-4)]))
            .unwrap();

        let json = grid.to_handle().to_json().unwrap();
        let handle = GridHandle::from_json(&json).unwrap();
        assert_eq!(handle.width, 2);
        assert_eq!(handle.height, 2);

        let consumer = ShmContext::new();
        let remote = consumer.grid(&handle).unwrap();
        assert_eq!(
            remote.get(1, 1).unwrap(),
            Element::Record(vec![Scalar::Int(3), Scalar::Int(-4)])
        );
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let ctx = ShmContext::new();
        let grid = ctx.create_grid(2, 2, ElementLayout::Raw).unwrap();
        let mut handle = grid.to_handle();
        handle.width = 3;
        assert!(matches!(
            ctx.grid(&handle),
            Err(ShmError::ViewGeometry { .. })
        ));
    }
}

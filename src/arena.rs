//! Tensor Arena
//!
//! One contiguous allocation subdivided into named, non-overlapping regions.
//! Both the parameter store and the activation store are arenas; they differ
//! only in which shapes they are built from.
//!
//! ## Layout
//!
//! Regions are packed back to back in the order they were declared, with no
//! padding between them:
//!
//! ```text
//! specs:   [ a: 6 ][ b: 2 ][ c: 4 ]
//! offsets:   0       6       8
//! data:    | a a a a a a | b b | c c c c |
//! len:     12
//! ```
//!
//! Each region's offset is the sum of the lengths before it, and the arena's
//! total length is the sum of all region lengths.
//!
//! ## Views
//!
//! Regions are handed out as ordinary slices borrowed from the arena, so a
//! view can never outlive or escape its backing buffer. [`Arena::split_mut`]
//! returns every region at once as disjoint `&mut` slices, which is what a
//! forward pass needs when it writes one activation while reading another.

use crate::error::{Gpt2Error, Result};
use crate::shapes::TensorSpec;
use tracing::debug;

/// Location of one named region inside an arena
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorSlot {
    pub name: &'static str,
    pub shape: Vec<usize>,
    pub offset: usize,
    pub len: usize,
}

impl TensorSlot {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// A flat buffer plus the table of regions carved out of it
#[derive(Debug)]
pub struct Arena<T> {
    label: &'static str,
    data: Vec<T>,
    slots: Vec<TensorSlot>,
}

impl<T: Copy + Default> Arena<T> {
    /// Allocate a zero-initialized arena holding one region per spec
    ///
    /// # Arguments
    ///
    /// * `label` - What the arena is for, used in errors and logs
    /// * `specs` - Region names and shapes, in layout order
    ///
    /// # Errors
    ///
    /// [`Gpt2Error::Allocation`] if a region's element count or the total
    /// overflows `usize` (reported as `usize::MAX` elements), or if the
    /// allocator cannot reserve the buffer.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use gpt2_arena::{Arena, TensorSpec};
    /// let specs = [
    ///     TensorSpec::new("a", vec![2, 3]),
    ///     TensorSpec::new("b", vec![2]),
    /// ];
    /// let arena = Arena::<f32>::allocate("demo", &specs)?;
    /// assert_eq!(arena.num_elements(), 8);
    /// assert_eq!(arena.slot(1).offset, 6);
    /// # Ok::<(), gpt2_arena::Gpt2Error>(())
    /// ```
    pub fn allocate(label: &'static str, specs: &[TensorSpec]) -> Result<Self> {
        let overflow = || Gpt2Error::Allocation {
            what: label,
            elements: usize::MAX,
        };

        let mut slots = Vec::with_capacity(specs.len());
        let mut total: usize = 0;
        for spec in specs {
            let len = spec.numel().ok_or_else(overflow)?;
            slots.push(TensorSlot {
                name: spec.name,
                shape: spec.shape.clone(),
                offset: total,
                len,
            });
            total = total.checked_add(len).ok_or_else(overflow)?;
        }

        let mut data = Vec::new();
        data.try_reserve_exact(total)
            .map_err(|_| Gpt2Error::Allocation {
                what: label,
                elements: total,
            })?;
        data.resize(total, T::default());

        debug!(
            arena = label,
            regions = slots.len(),
            elements = total,
            bytes = total * std::mem::size_of::<T>(),
            "allocated arena"
        );

        Ok(Self { label, data, slots })
    }

    /// A separately owned arena with the same layout, filled with zeros
    ///
    /// This is the shape a gradient buffer takes: identical regions, no
    /// shared storage.
    pub fn zeroed_like(&self) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(self.data.len())
            .map_err(|_| Gpt2Error::Allocation {
                what: self.label,
                elements: self.data.len(),
            })?;
        data.resize(self.data.len(), T::default());
        Ok(Self {
            label: self.label,
            data,
            slots: self.slots.clone(),
        })
    }
}

impl<T> Arena<T> {
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Total elements across all regions
    pub fn num_elements(&self) -> usize {
        self.data.len()
    }

    pub fn num_tensors(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[TensorSlot] {
        &self.slots
    }

    /// Region table entry by position
    ///
    /// # Panics
    ///
    /// Panics if `index >= num_tensors()`
    pub fn slot(&self, index: usize) -> &TensorSlot {
        &self.slots[index]
    }

    fn find(&self, name: &str) -> Option<&TensorSlot> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    /// Region contents by position
    pub fn view(&self, index: usize) -> &[T] {
        &self.data[self.slots[index].range()]
    }

    pub fn view_mut(&mut self, index: usize) -> &mut [T] {
        let range = self.slots[index].range();
        &mut self.data[range]
    }

    /// Region contents by name
    pub fn get(&self, name: &str) -> Option<&[T]> {
        let range = self.find(name)?.range();
        Some(&self.data[range])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut [T]> {
        let range = self.find(name)?.range();
        Some(&mut self.data[range])
    }

    /// The whole backing buffer
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Address of the backing buffer, for identity checks
    pub fn as_ptr(&self) -> *const T {
        self.data.as_ptr()
    }

    /// Every region as a shared slice, in layout order
    pub fn split(&self) -> Vec<&[T]> {
        self.slots.iter().map(|slot| &self.data[slot.range()]).collect()
    }

    /// Every region as a disjoint mutable slice, in layout order
    pub fn split_mut(&mut self) -> Vec<&mut [T]> {
        let mut views = Vec::with_capacity(self.slots.len());
        let mut rest: &mut [T] = &mut self.data;
        for slot in &self.slots {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(slot.len);
            views.push(head);
            rest = tail;
        }
        views
    }
}

//! Method data shapes: layouts and packets.
//!
//! Every method input and output is a *layout*: an ordered list of named
//! bit-fields. A *packet* is a value of a layout, carrying one `u64` per
//! field masked to the field width. This module provides:
//! 1. **Layouts:** construction with width/duplication checks, field lookup.
//! 2. **Packets:** field access by name, zero values, packed 64-bit forms
//!    for storage cells and associative keys.

use std::rc::Rc;

use crate::common::BuildError;

/// A single named bit-field of a layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    /// Field name.
    pub name: &'static str,
    /// Field width in bits (1..=64).
    pub width: u32,
}

/// An ordered list of named bit-fields describing a method input or output.
///
/// Layouts are immutable once built and shared by reference; two layouts are
/// considered the same shape when their field lists match, regardless of the
/// layout name.
#[derive(Clone, Debug)]
pub struct Layout {
    name: String,
    fields: Vec<Field>,
}

/// Shared handle to a layout.
pub type LayoutRef = Rc<Layout>;

impl PartialEq for Layout {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for Layout {}

impl Layout {
    /// Builds a layout from `(name, width)` pairs.
    ///
    /// Fails if a field is wider than 64 bits, zero-width, or duplicated.
    pub fn new(name: &str, fields: &[(&'static str, u32)]) -> Result<LayoutRef, BuildError> {
        let mut out = Vec::with_capacity(fields.len());
        for (fname, width) in fields {
            if *width == 0 || *width > 64 {
                return Err(BuildError::FieldTooWide {
                    layout: name.to_string(),
                    field: (*fname).to_string(),
                    width: *width,
                });
            }
            if out.iter().any(|f: &Field| f.name == *fname) {
                return Err(BuildError::DuplicateField {
                    layout: name.to_string(),
                    field: (*fname).to_string(),
                });
            }
            out.push(Field {
                name: fname,
                width: *width,
            });
        }
        Ok(Rc::new(Self {
            name: name.to_string(),
            fields: out,
        }))
    }

    /// The empty layout, for methods that take or return nothing.
    pub fn empty() -> LayoutRef {
        Rc::new(Self {
            name: String::new(),
            fields: Vec::new(),
        })
    }

    /// Returns the layout name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the fields in declaration order.
    #[inline]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Returns the total packed width in bits.
    pub fn width(&self) -> usize {
        self.fields.iter().map(|f| f.width as usize).sum()
    }

    /// Returns the position of the named field, if present.
    pub fn index_of(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == field)
    }

    fn require(&self, field: &str) -> usize {
        match self.index_of(field) {
            Some(i) => i,
            None => panic!("layout `{}` has no field `{field}`", self.name),
        }
    }
}

/// Returns the all-ones mask for a field width (1..=64 bits).
#[inline]
pub fn width_mask(width: u32) -> u64 {
    if width >= 64 { u64::MAX } else { (1 << width) - 1 }
}

/// A value of a [`Layout`]: one `u64` per field, masked to the field width.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    layout: LayoutRef,
    vals: Vec<u64>,
}

impl Packet {
    /// Creates an all-zero packet of the given layout.
    pub fn zero(layout: &LayoutRef) -> Self {
        Self {
            layout: Rc::clone(layout),
            vals: vec![0; layout.fields().len()],
        }
    }

    /// Creates a packet and assigns the given fields.
    ///
    /// # Panics
    ///
    /// Panics if a named field does not exist in the layout.
    pub fn with(layout: &LayoutRef, fields: &[(&str, u64)]) -> Self {
        let mut p = Self::zero(layout);
        for (name, val) in fields {
            p.set(name, *val);
        }
        p
    }

    /// Returns the packet's layout.
    #[inline]
    pub fn layout(&self) -> &LayoutRef {
        &self.layout
    }

    /// Reads a field by name.
    ///
    /// # Panics
    ///
    /// Panics if the field does not exist.
    pub fn get(&self, field: &str) -> u64 {
        self.vals[self.layout.require(field)]
    }

    /// Writes a field by name, masking the value to the field width.
    ///
    /// # Panics
    ///
    /// Panics if the field does not exist.
    pub fn set(&mut self, field: &str, val: u64) -> &mut Self {
        let idx = self.layout.require(field);
        self.vals[idx] = val & width_mask(self.layout.fields()[idx].width);
        self
    }

    /// Packs the fields into a single word, first field in the low bits.
    ///
    /// # Panics
    ///
    /// Panics if the layout is wider than 64 bits; storage components check
    /// this at build time.
    pub fn pack(&self) -> u64 {
        let total = self.layout.width();
        assert!(total <= 64, "layout `{}` too wide to pack", self.layout.name());
        let mut bits = 0u64;
        let mut shift = 0u32;
        for (field, val) in self.layout.fields().iter().zip(&self.vals) {
            bits |= val << shift;
            shift += field.width;
        }
        bits
    }

    /// Unpacks a word into a packet, first field from the low bits.
    pub fn unpack(layout: &LayoutRef, bits: u64) -> Self {
        let mut p = Self::zero(layout);
        let mut shift = 0u32;
        for i in 0..layout.fields().len() {
            let width = layout.fields()[i].width;
            p.vals[i] = (bits >> shift) & width_mask(width);
            shift += width;
        }
        p
    }
}

// Copyright (c) 2025-present, factstore
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The tuple element domain: a width-matched triple of signed, unsigned and
//! float types, bit-preserving conversions between them, and the per-column
//! type tags relations are declared with.
//!
//! The default domain is 32 bits wide; the `wide-domain` cargo feature
//! switches the whole triple to 64 bits.

use std::cmp::Ordering;

#[cfg(not(feature = "wide-domain"))]
mod width {
    pub type RamSigned = i32;
    pub type RamUnsigned = u32;
    pub type RamFloat = f32;
}

#[cfg(feature = "wide-domain")]
mod width {
    pub type RamSigned = i64;
    pub type RamUnsigned = u64;
    pub type RamFloat = f64;
}

/// The signed member of the domain triple.
pub type RamSigned = width::RamSigned;

/// The unsigned member of the domain triple.
pub type RamUnsigned = width::RamUnsigned;

/// The float member of the domain triple.
pub type RamFloat = width::RamFloat;

/// The canonical storage type for tuple elements. Columns of any tag are
/// stored as `RamDomain` and reinterpreted through [`ram_bit_cast`].
pub type RamDomain = RamSigned;

/// A fixed-arity tuple of domain values.
pub type Tuple<const ARITY: usize> = [RamDomain; ARITY];

/// A member of the domain triple, convertible to and from the canonical
/// storage type without changing any bits.
pub trait RamType: Copy {
    /// Reinterprets the bits of this value as the storage type.
    fn to_domain(self) -> RamDomain;

    /// Reinterprets storage bits as a value of this type.
    fn from_domain(value: RamDomain) -> Self;
}

impl RamType for RamSigned {
    fn to_domain(self) -> RamDomain {
        self
    }

    fn from_domain(value: RamDomain) -> Self {
        value
    }
}

impl RamType for RamUnsigned {
    #[allow(clippy::cast_sign_loss)]
    fn to_domain(self) -> RamDomain {
        self as RamDomain
    }

    #[allow(clippy::cast_possible_wrap)]
    fn from_domain(value: RamDomain) -> Self {
        value as Self
    }
}

impl RamType for RamFloat {
    #[allow(clippy::cast_possible_wrap)]
    fn to_domain(self) -> RamDomain {
        self.to_bits() as RamDomain
    }

    #[allow(clippy::cast_sign_loss)]
    fn from_domain(value: RamDomain) -> Self {
        Self::from_bits(value as RamUnsigned)
    }
}

/// Reinterprets the bits of one domain-triple value as another. Total and
/// lossless; `ram_bit_cast::<A, _>(ram_bit_cast::<RamDomain, _>(x)) == x`
/// holds for every member type `A` and value `x : A`.
#[must_use]
pub fn ram_bit_cast<To: RamType, From: RamType>(value: From) -> To {
    To::from_domain(value.to_domain())
}

/// The smallest signed domain value.
pub const MIN_RAM_SIGNED: RamSigned = RamSigned::MIN;

/// The largest signed domain value.
pub const MAX_RAM_SIGNED: RamSigned = RamSigned::MAX;

/// The largest unsigned domain value.
pub const MAX_RAM_UNSIGNED: RamUnsigned = RamUnsigned::MAX;

/// The type tag carried by a relation column, selecting how its stored
/// `RamDomain` values are interpreted, compared and rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeAttribute {
    /// Signed number (`i`)
    Signed,
    /// Unsigned number (`u`)
    Unsigned,
    /// Float (`f`)
    Float,
    /// Index into a symbol table (`s`)
    Symbol,
    /// Index into a record table (`r`)
    Record,
    /// Branch of an algebraic data type (`+`)
    Adt,
}

impl TypeAttribute {
    /// Parses the single-letter tag used in relation declarations.
    #[must_use]
    pub fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'i' => Some(Self::Signed),
            'u' => Some(Self::Unsigned),
            'f' => Some(Self::Float),
            's' => Some(Self::Symbol),
            'r' => Some(Self::Record),
            '+' => Some(Self::Adt),
            _ => None,
        }
    }

    /// The single-letter tag of this attribute.
    #[must_use]
    pub fn tag(self) -> char {
        match self {
            Self::Signed => 'i',
            Self::Unsigned => 'u',
            Self::Float => 'f',
            Self::Symbol => 's',
            Self::Record => 'r',
            Self::Adt => '+',
        }
    }

    /// Compares two stored values of a column carrying this tag, using the
    /// natural order of the tagged type. Floats use the IEEE total order.
    #[must_use]
    pub fn compare(self, a: RamDomain, b: RamDomain) -> Ordering {
        match self {
            Self::Signed | Self::Symbol | Self::Record | Self::Adt => a.cmp(&b),
            Self::Unsigned => {
                ram_bit_cast::<RamUnsigned, _>(a).cmp(&ram_bit_cast::<RamUnsigned, _>(b))
            }
            Self::Float => {
                ram_bit_cast::<RamFloat, _>(a).total_cmp(&ram_bit_cast::<RamFloat, _>(b))
            }
        }
    }
}

/// Compares two tuples column by column, dispatching each column on its tag.
/// Tuples longer than the tag list compare their tail columns as signed.
#[must_use]
pub fn compare_typed(tags: &[TypeAttribute], a: &[RamDomain], b: &[RamDomain]) -> Ordering {
    debug_assert_eq!(a.len(), b.len());

    for (i, (&x, &y)) in a.iter().zip(b.iter()).enumerate() {
        let tag = tags.get(i).copied().unwrap_or(TypeAttribute::Signed);
        match tag.compare(x, y) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}
